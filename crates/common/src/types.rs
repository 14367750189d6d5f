use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn is_buy(self) -> bool {
        self == Direction::Buy
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(Direction::Buy),
            "SELL" => Some(Direction::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Per-account position supervision mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    General,
    BePips,
    BePnl,
    Reentry,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::General => write!(f, "general"),
            TradingMode::BePips => write!(f, "be_pips"),
            TradingMode::BePnl => write!(f, "be_pnl"),
            TradingMode::Reentry => write!(f, "reentry"),
        }
    }
}

/// One broker account, loaded from `ACCOUNTS_JSON` at startup.
/// Immutable within a process generation; reloaded on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Fixed lot per order; 0 enables risk-based sizing.
    #[serde(default)]
    pub fixed_lot: f64,
    /// Risk per trade as percent of balance, used when `fixed_lot` is 0.
    #[serde(default)]
    pub risk_percent: f64,
    /// Telegram chat for account alerts.
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// If set, only signals originating from these channels are copied.
    #[serde(default)]
    pub allowed_channels: Option<Vec<i64>>,
    #[serde(default)]
    pub trading_mode: TradingMode,
    /// Pip progress that arms the be_pips / be_pnl modes.
    #[serde(default)]
    pub be_pips: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl AccountConfig {
    /// True when this account accepts signals from `channel`.
    pub fn accepts_channel(&self, channel: i64) -> bool {
        match &self.allowed_channels {
            None => true,
            Some(list) => list.contains(&channel),
        }
    }
}

/// Management-message provider vocabularies recognised by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderHint {
    GoldBrothers,
    Torofx,
    Hannah,
}

impl ProviderHint {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderHint::GoldBrothers => "GOLD_BROTHERS",
            ProviderHint::Torofx => "TOROFX",
            ProviderHint::Hannah => "HANNAH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOLD_BROTHERS" => Some(ProviderHint::GoldBrothers),
            "TOROFX" => Some(ProviderHint::Torofx),
            "HANNAH" => Some(ProviderHint::Hannah),
            _ => None,
        }
    }
}

/// Raw chat message as published on `raw_messages` by the ingester.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub chat_id: i64,
    pub message_id: String,
    pub date: String,
    pub text: String,
}

impl RawMessage {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            chat_id: fields
                .get("chat_id")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            message_id: fields.get("message_id").cloned().unwrap_or_default(),
            date: fields.get("date").cloned().unwrap_or_default(),
            text: fields.get("text").cloned().unwrap_or_default(),
        }
    }
}

/// Management follow-up as published on `mgmt_messages` by the router.
#[derive(Debug, Clone)]
pub struct MgmtMessage {
    pub chat_id: i64,
    pub text: String,
    pub provider_hint: Option<ProviderHint>,
}

impl MgmtMessage {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            chat_id: fields
                .get("chat_id")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            text: fields.get("text").cloned().unwrap_or_default(),
            provider_hint: fields
                .get("provider_hint")
                .and_then(|v| ProviderHint::parse(v)),
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("chat_id", self.chat_id.to_string()),
            ("text", self.text.clone()),
            (
                "provider_hint",
                self.provider_hint.map(|h| h.as_str()).unwrap_or("").to_string(),
            ),
        ]
    }
}

/// Canonical parsed signal as published on `parsed_signals`.
///
/// Invariant: `symbol` and `direction` are always present; either
/// `entry_range` or `hint_price` is present; `entry_range.0 <= entry_range.1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_range: Option<(f64, f64)>,
    pub sl: Option<f64>,
    pub tps: Vec<f64>,
    pub provider_tag: String,
    pub format_tag: String,
    pub fast: bool,
    pub hint_price: Option<f64>,
    pub chat_id: i64,
    pub raw_text: String,
    pub trace: String,
    /// Set by the router when an unexpired FAST record matches this signal:
    /// the existing FAST position is retargeted instead of opening anew.
    pub upgrade: bool,
}

impl ParsedSignal {
    /// Wire encoding: string key/values, ranges and TP lists as JSON arrays.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let entry_range = match self.entry_range {
            Some((lo, hi)) => serde_json::json!([lo, hi]).to_string(),
            None => String::new(),
        };
        vec![
            ("symbol", self.symbol.clone()),
            ("direction", self.direction.to_string()),
            ("entry_range", entry_range),
            (
                "sl",
                self.sl.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("tps", serde_json::json!(self.tps).to_string()),
            ("provider_tag", self.provider_tag.clone()),
            ("format_tag", self.format_tag.clone()),
            ("fast", if self.fast { "true" } else { "false" }.to_string()),
            (
                "hint_price",
                self.hint_price.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("chat_id", self.chat_id.to_string()),
            ("raw_text", self.raw_text.clone()),
            ("trace", self.trace.clone()),
            ("upgrade", if self.upgrade { "true" } else { "false" }.to_string()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let symbol = fields.get("symbol")?.clone();
        let direction = Direction::parse(fields.get("direction")?)?;
        let entry_range = fields
            .get("entry_range")
            .filter(|v| !v.is_empty())
            .and_then(|v| serde_json::from_str::<(f64, f64)>(v).ok());
        let tps: Vec<f64> = fields
            .get("tps")
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or_default();
        Some(Self {
            symbol,
            direction,
            entry_range,
            sl: fields.get("sl").and_then(|v| v.parse().ok()),
            tps,
            provider_tag: fields.get("provider_tag").cloned().unwrap_or_default(),
            format_tag: fields.get("format_tag").cloned().unwrap_or_default(),
            fast: fields.get("fast").map(|v| v == "true").unwrap_or(false),
            hint_price: fields.get("hint_price").and_then(|v| v.parse().ok()),
            chat_id: fields
                .get("chat_id")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            raw_text: fields.get("raw_text").cloned().unwrap_or_default(),
            trace: fields.get("trace").cloned().unwrap_or_default(),
            upgrade: fields.get("upgrade").map(|v| v == "true").unwrap_or(false),
        })
    }
}

/// Command envelope routed to the executor over `trade_commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeCommand {
    Open {
        signal_id: String,
        symbol: String,
        direction: Direction,
        entry_range: Option<(f64, f64)>,
        sl: f64,
        tps: Vec<f64>,
        provider_tag: String,
        accounts: Vec<String>,
        source_channel: i64,
        timestamp: DateTime<Utc>,
    },
    Close {
        account: String,
        ticket: u64,
        reason: String,
    },
    PartialClose {
        account: String,
        ticket: u64,
        percent: u8,
    },
    ModifySl {
        account: String,
        ticket: u64,
        sl: f64,
        reason: String,
    },
    Be {
        account: String,
        ticket: u64,
    },
    Trailing {
        account: String,
        ticket: u64,
        sl: f64,
    },
    Addon {
        account: String,
        ticket: u64,
        volume: f64,
    },
}

/// Event envelope published on `trade_events` and mirrored to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    SignalSkipped {
        reason: String,
        trace: String,
    },
    OpenErrors {
        trace: String,
        errors: HashMap<String, String>,
    },
    TradeOpened {
        account: String,
        ticket: u64,
        symbol: String,
        direction: Direction,
        provider_tag: String,
        entry: Option<f64>,
        sl: f64,
        tps: Vec<f64>,
    },
    TpHit {
        account: String,
        ticket: u64,
        symbol: String,
        tp_index: usize,
        tp_price: f64,
        price: f64,
        closed_percent: u8,
    },
    PartialClosed {
        account: String,
        ticket: u64,
        symbol: String,
        percent: u8,
        closed_volume: f64,
        price: f64,
        reason: String,
    },
    BreakEvenSet {
        account: String,
        ticket: u64,
        sl: f64,
    },
    BreakEvenFailed {
        account: String,
        ticket: u64,
        reason: String,
    },
    TrailingUpdated {
        account: String,
        ticket: u64,
        sl: f64,
    },
    AddonOpened {
        account: String,
        ticket: u64,
        base_ticket: u64,
        group: u64,
        price: f64,
        volume: f64,
    },
    RunnerOpened {
        account: String,
        ticket: u64,
        symbol: String,
        volume: f64,
        sl: f64,
        tp: f64,
    },
    TradeClosed {
        account: String,
        ticket: u64,
        symbol: String,
        reason: String,
        profit: Option<f64>,
    },
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_signal_field_round_trip() {
        let sig = ParsedSignal {
            symbol: "XAUUSD".into(),
            direction: Direction::Buy,
            entry_range: Some((4457.0, 4460.0)),
            sl: Some(4454.0),
            tps: vec![4463.0, 4466.0],
            provider_tag: "hannah".into(),
            format_tag: "HANNAH".into(),
            fast: false,
            hint_price: None,
            chat_id: -5250557024,
            raw_text: "GOLD BUY NOW".into(),
            trace: "abc12345".into(),
            upgrade: false,
        };
        let fields: HashMap<String, String> = sig
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let back = ParsedSignal::from_fields(&fields).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn trade_command_tagged_json() {
        let cmd = TradeCommand::PartialClose {
            account: "alpha".into(),
            ticket: 42,
            percent: 50,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"partial_close\""));
        let back: TradeCommand = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, TradeCommand::PartialClose { ticket: 42, .. }));
    }

    #[test]
    fn account_channel_filter() {
        let mut acc: AccountConfig = serde_json::from_str(
            r#"{"name":"a","host":"h","port":18812}"#,
        )
        .unwrap();
        assert!(acc.accepts_channel(-123));
        acc.allowed_channels = Some(vec![-5250557024]);
        assert!(acc.accepts_channel(-5250557024));
        assert!(!acc.accepts_channel(-999));
    }
}
