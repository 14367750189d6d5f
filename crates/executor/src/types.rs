//! MT5 RPC surface: request/response shapes and protocol constants.

use common::Direction;
use serde::{Deserialize, Serialize};

// Trade request actions
pub const ACTION_DEAL: i64 = 1;
pub const ACTION_SLTP: i64 = 6;

// Order types
pub const ORDER_TYPE_BUY: i64 = 0;
pub const ORDER_TYPE_SELL: i64 = 1;

pub const ORDER_TIME_GTC: i64 = 0;

// Filling modes
pub const FILLING_FOK: i64 = 0;
pub const FILLING_IOC: i64 = 1;
pub const FILLING_RETURN: i64 = 2;

/// Retry order when the broker rejects the advertised filling mode.
pub const FILLING_FALLBACK: [i64; 3] = [FILLING_IOC, FILLING_FOK, FILLING_RETURN];

// Retcodes
pub const RETCODE_DONE: i64 = 10009;
pub const RETCODE_DONE_PARTIAL: i64 = 10008;
pub const RETCODE_UNSUPPORTED_FILL: i64 = 10013;
pub const RETCODE_INVALID_FILL: i64 = 10030;

pub fn retcode_ok(retcode: i64) -> bool {
    retcode == RETCODE_DONE || retcode == RETCODE_DONE_PARTIAL
}

pub fn retcode_is_fill_mismatch(retcode: i64) -> bool {
    retcode == RETCODE_INVALID_FILL || retcode == RETCODE_UNSUPPORTED_FILL
}

pub fn order_type_for(direction: Direction) -> i64 {
    match direction {
        Direction::Buy => ORDER_TYPE_BUY,
        Direction::Sell => ORDER_TYPE_SELL,
    }
}

/// Symbol specification as reported by the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub point: f64,
    pub digits: i32,
    pub volume_step: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub tick_value: f64,
    pub tick_size: f64,
    /// Minimum stop distance, in points.
    pub stops_level: f64,
    /// Current spread, in points.
    #[serde(default)]
    pub spread: f64,
    /// Filling mode advertised for the symbol.
    #[serde(default)]
    pub trade_fill_mode: i64,
}

impl SymbolInfo {
    pub fn min_stop_distance(&self) -> f64 {
        self.stops_level * self.point
    }

    pub fn spread_price(&self) -> f64 {
        self.spread * self.point
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub time: i64,
}

impl Tick {
    /// Price a market order of `direction` would fill at.
    pub fn entry_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Buy => self.ask,
            Direction::Sell => self.bid,
        }
    }

    /// Price the counter order closing a `direction` position fills at.
    pub fn close_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Buy => self.bid,
            Direction::Sell => self.ask,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub ticket: u64,
    pub symbol: String,
    /// 0 = BUY, 1 = SELL.
    #[serde(rename = "type")]
    pub position_type: i64,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub sl: f64,
    pub tp: f64,
    pub magic: i64,
    #[serde(default)]
    pub time_update: i64,
    #[serde(default)]
    pub profit: f64,
}

impl PositionInfo {
    pub fn direction(&self) -> Direction {
        if self.position_type == ORDER_TYPE_BUY {
            Direction::Buy
        } else {
            Direction::Sell
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub action: i64,
    pub symbol: String,
    pub volume: f64,
    #[serde(rename = "type")]
    pub order_type: i64,
    pub price: f64,
    pub sl: f64,
    pub tp: f64,
    pub deviation: i64,
    pub magic: i64,
    pub comment: String,
    pub type_time: i64,
    pub type_filling: i64,
    /// Set for SLTP modifications and position-closing counter orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResult {
    pub retcode: i64,
    #[serde(default)]
    pub order: u64,
    #[serde(default)]
    pub deal: u64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub free_margin: f64,
}

/// Order comments must survive broker truncation and charset limits.
pub fn safe_comment(prefix: &str, tag: &str) -> String {
    let base = format!("{prefix}-{tag}");
    let clean: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    clean.chars().take(31).collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
