//! Simulated MT5 bridge.
//!
//! Implements the bridge trait against an in-memory ledger: quotes are set
//! by the test (or a paper feed), market orders fill at the current tick,
//! counter orders with a `position` reduce or remove it, SLTP requests
//! mutate stops in place. Configurable accepted filling modes and stop
//! levels reproduce the broker behaviours the executor must survive.
//!
//! No real orders are ever sent anywhere.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use common::pips::{pip_value, profit_pips};
use common::{Direction, Result};
use executor::types::{
    retcode_ok, AccountInfo, OrderRequest, OrderResult, PositionInfo, SymbolInfo, Tick,
    ACTION_DEAL, ACTION_SLTP, ORDER_TYPE_BUY, RETCODE_DONE, RETCODE_INVALID_FILL,
};
use executor::Mt5Bridge;

/// A reasonable gold spec for tests: 2-digit quotes, 0.01 lot step,
/// 20-point spread.
pub fn gold_info() -> SymbolInfo {
    SymbolInfo {
        point: 0.01,
        digits: 2,
        volume_step: 0.01,
        volume_min: 0.01,
        volume_max: 100.0,
        tick_value: 1.0,
        tick_size: 0.01,
        stops_level: 0.0,
        spread: 20.0,
        trade_fill_mode: executor::types::FILLING_IOC,
    }
}

#[derive(Default)]
struct SimState {
    symbols: HashMap<String, SymbolInfo>,
    ticks: HashMap<String, Tick>,
    selected: HashSet<String>,
    positions: Vec<PositionInfo>,
    next_ticket: u64,
    clock: i64,
    balance: f64,
    /// None = accept every filling mode.
    accepted_fillings: Option<HashSet<i64>>,
    orders: Vec<OrderRequest>,
}

pub struct SimBridge {
    state: RwLock<SimState>,
}

impl SimBridge {
    pub fn new(balance: f64) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(SimState {
                next_ticket: 1000,
                balance,
                ..SimState::default()
            }),
        })
    }

    pub async fn add_symbol(&self, symbol: &str, info: SymbolInfo) {
        self.state.write().await.symbols.insert(symbol.to_string(), info);
    }

    pub async fn set_tick(&self, symbol: &str, bid: f64, ask: f64) {
        let mut state = self.state.write().await;
        state.clock += 1;
        let time = state.clock;
        state.ticks.insert(symbol.to_string(), Tick { bid, ask, time });
        // Revalue open positions on the new quote.
        let infos = state.symbols.clone();
        for pos in state.positions.iter_mut().filter(|p| p.symbol == symbol) {
            let point = infos.get(symbol).map(|i| i.point).unwrap_or(0.01);
            pos.price_current = if pos.position_type == ORDER_TYPE_BUY { bid } else { ask };
            let pips = profit_pips(symbol, pos.direction(), pos.price_open, pos.price_current, point);
            pos.profit = pips * pip_value(symbol, pos.volume);
        }
    }

    /// Convenience: bid = price, ask = price + spread.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        let spread = {
            let state = self.state.read().await;
            state
                .symbols
                .get(symbol)
                .map(|i| i.spread_price())
                .unwrap_or(0.0)
        };
        self.set_tick(symbol, price, price + spread).await;
    }

    /// Restrict which filling modes `order_send` accepts.
    pub async fn accept_fillings(&self, modes: &[i64]) {
        self.state.write().await.accepted_fillings = Some(modes.iter().copied().collect());
    }

    pub async fn positions(&self) -> Vec<PositionInfo> {
        self.state.read().await.positions.clone()
    }

    /// Plant a pre-existing position (orphan adoption, mgmt tests).
    pub async fn seed_position(&self, pos: PositionInfo) {
        let mut state = self.state.write().await;
        state.next_ticket = state.next_ticket.max(pos.ticket + 1);
        state.positions.push(pos);
    }

    /// Every request `order_send` has seen, in order.
    pub async fn orders_sent(&self) -> Vec<OrderRequest> {
        self.state.read().await.orders.clone()
    }
}

#[async_trait]
impl Mt5Bridge for SimBridge {
    async fn symbol_select(&self, symbol: &str, enable: bool) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.symbols.contains_key(symbol) {
            return Ok(false);
        }
        if enable {
            state.selected.insert(symbol.to_string());
        } else {
            state.selected.remove(symbol);
        }
        Ok(true)
    }

    async fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>> {
        Ok(self.state.read().await.symbols.get(symbol).cloned())
    }

    async fn symbol_info_tick(&self, symbol: &str) -> Result<Option<Tick>> {
        Ok(self.state.read().await.ticks.get(symbol).copied())
    }

    async fn positions_get(&self, ticket: Option<u64>) -> Result<Vec<PositionInfo>> {
        let state = self.state.read().await;
        Ok(match ticket {
            Some(t) => state.positions.iter().filter(|p| p.ticket == t).cloned().collect(),
            None => state.positions.clone(),
        })
    }

    async fn order_send(&self, req: &OrderRequest) -> Result<OrderResult> {
        let mut state = self.state.write().await;
        state.orders.push(req.clone());
        state.clock += 1;
        let now = state.clock;

        if let Some(accepted) = &state.accepted_fillings {
            if !accepted.contains(&req.type_filling) {
                debug!(filling = req.type_filling, "sim rejecting filling mode");
                return Ok(OrderResult {
                    retcode: RETCODE_INVALID_FILL,
                    order: 0,
                    deal: 0,
                    comment: "Unsupported filling mode".to_string(),
                });
            }
        }

        match req.action {
            ACTION_SLTP => {
                let ticket = req.position.unwrap_or(0);
                match state.positions.iter_mut().find(|p| p.ticket == ticket) {
                    Some(pos) => {
                        pos.sl = req.sl;
                        pos.tp = req.tp;
                        pos.time_update = now;
                        Ok(done(ticket, now as u64))
                    }
                    None => Ok(OrderResult {
                        retcode: 10036, // position closed
                        order: 0,
                        deal: 0,
                        comment: "Position doesn't exist".to_string(),
                    }),
                }
            }
            ACTION_DEAL => {
                if let Some(ticket) = req.position {
                    // Counter order closing part or all of a position.
                    let Some(idx) = state.positions.iter().position(|p| p.ticket == ticket) else {
                        return Ok(OrderResult {
                            retcode: 10036,
                            order: 0,
                            deal: 0,
                            comment: "Position doesn't exist".to_string(),
                        });
                    };
                    let pos = &mut state.positions[idx];
                    pos.volume -= req.volume;
                    pos.time_update = now;
                    if pos.volume <= 1e-9 {
                        state.positions.remove(idx);
                    }
                    Ok(done(ticket, now as u64))
                } else {
                    // New market position, filled at the current tick.
                    let fill = state
                        .ticks
                        .get(&req.symbol)
                        .map(|t| {
                            if req.order_type == ORDER_TYPE_BUY {
                                t.ask
                            } else {
                                t.bid
                            }
                        })
                        .unwrap_or(req.price);
                    state.next_ticket += 1;
                    let ticket = state.next_ticket;
                    state.positions.push(PositionInfo {
                        ticket,
                        symbol: req.symbol.clone(),
                        position_type: req.order_type,
                        volume: req.volume,
                        price_open: fill,
                        price_current: fill,
                        sl: req.sl,
                        tp: req.tp,
                        magic: req.magic,
                        time_update: now,
                        profit: 0.0,
                    });
                    Ok(done(ticket, now as u64))
                }
            }
            other => Ok(OrderResult {
                retcode: 10013,
                order: 0,
                deal: 0,
                comment: format!("Unsupported action {other}"),
            }),
        }
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let state = self.state.read().await;
        Ok(AccountInfo {
            balance: state.balance,
            equity: state.balance,
            free_margin: state.balance,
        })
    }
}

fn done(order: u64, deal: u64) -> OrderResult {
    OrderResult {
        retcode: RETCODE_DONE,
        order,
        deal,
        comment: "Request executed".to_string(),
    }
}

/// Open a position directly on the sim, returning its ticket.
/// Test helper used across crates.
pub async fn open_market(
    bridge: &SimBridge,
    symbol: &str,
    direction: Direction,
    volume: f64,
    sl: f64,
    magic: i64,
) -> u64 {
    let req = OrderRequest {
        action: ACTION_DEAL,
        symbol: symbol.to_string(),
        volume,
        order_type: executor::types::order_type_for(direction),
        price: 0.0,
        sl,
        tp: 0.0,
        deviation: 50,
        magic,
        comment: "test".to_string(),
        type_time: 0,
        type_filling: executor::types::FILLING_IOC,
        position: None,
    };
    let res = bridge.order_send(&req).await.unwrap();
    assert!(retcode_ok(res.retcode), "sim open failed: {}", res.comment);
    res.order
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn gold_sim() -> Arc<SimBridge> {
        let sim = SimBridge::new(10_000.0);
        sim.add_symbol("XAUUSD", gold_info()).await;
        sim.set_tick("XAUUSD", 4459.8, 4460.0).await;
        sim
    }

    #[tokio::test]
    async fn market_buy_fills_at_ask() {
        let sim = gold_sim().await;
        let ticket = open_market(&sim, "XAUUSD", Direction::Buy, 0.03, 4454.0, 7).await;
        let pos = sim.positions_get(Some(ticket)).await.unwrap();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].price_open, 4460.0);
        assert_eq!(pos[0].sl, 4454.0);
    }

    #[tokio::test]
    async fn counter_order_reduces_then_removes() {
        let sim = gold_sim().await;
        let ticket = open_market(&sim, "XAUUSD", Direction::Buy, 0.03, 4454.0, 7).await;

        let close = OrderRequest {
            action: ACTION_DEAL,
            symbol: "XAUUSD".into(),
            volume: 0.01,
            order_type: executor::types::ORDER_TYPE_SELL,
            price: 4459.8,
            sl: 0.0,
            tp: 0.0,
            deviation: 50,
            magic: 7,
            comment: "c".into(),
            type_time: 0,
            type_filling: executor::types::FILLING_IOC,
            position: Some(ticket),
        };
        sim.order_send(&close).await.unwrap();
        let pos = sim.positions_get(Some(ticket)).await.unwrap();
        assert!((pos[0].volume - 0.02).abs() < 1e-9);

        let close_rest = OrderRequest { volume: 0.02, ..close };
        sim.order_send(&close_rest).await.unwrap();
        assert!(sim.positions_get(Some(ticket)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_unaccepted_filling_modes() {
        let sim = gold_sim().await;
        sim.accept_fillings(&[executor::types::FILLING_FOK]).await;
        let req = OrderRequest {
            action: ACTION_DEAL,
            symbol: "XAUUSD".into(),
            volume: 0.01,
            order_type: ORDER_TYPE_BUY,
            price: 4460.0,
            sl: 0.0,
            tp: 0.0,
            deviation: 50,
            magic: 7,
            comment: "t".into(),
            type_time: 0,
            type_filling: executor::types::FILLING_IOC,
            position: None,
        };
        let res = sim.order_send(&req).await.unwrap();
        assert_eq!(res.retcode, RETCODE_INVALID_FILL);
    }

    #[tokio::test]
    async fn tick_updates_revalue_positions() {
        let sim = gold_sim().await;
        let ticket = open_market(&sim, "XAUUSD", Direction::Buy, 0.1, 4454.0, 7).await;
        sim.set_tick("XAUUSD", 4463.0, 4463.2).await;
        let pos = sim.positions_get(Some(ticket)).await.unwrap();
        assert_eq!(pos[0].price_current, 4463.0);
        // 30 pips on 0.1 lots of gold at $1/pip/lot
        assert!((pos[0].profit - 3.0).abs() < 1e-6);
    }
}
