//! Per-account supervision loop.
//!
//! One cooperative tick per account per iteration, all accounts ticked
//! concurrently. Each tick re-reads live positions, prunes closed tickets,
//! adopts unknown positions carrying our magic (restart recovery), and
//! dispatches every surviving trade to the account's trading-mode handler.
//! Decisions are a function of the current position snapshot and the trade's
//! local state only, so ticks stay self-healing across reconnects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use common::pips::default_sl_price;
use common::{
    AccountConfig, Bus, Direction, EventSink, ParsedSignal, Result, Settings, TradeEvent,
    TradingMode,
};
use executor::types::{PositionInfo, SymbolInfo};
use executor::Mt5Executor;

use crate::trade::{ManagedTrade, TradeRegistry};

/// External veto for runner re-entries: `filter(symbol) == false` blocks a
/// runner outside the post-TP1 grace window.
pub type MomentumFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub loop_sleep: Duration,

    pub scalp_tp1_percent: u8,
    pub scalp_tp2_percent: u8,
    pub long_tp1_percent: u8,
    pub long_tp2_percent: u8,

    pub runner_retrace_pips: f64,
    pub buffer_pips: f64,

    pub enable_be_after_tp1: bool,
    pub be_offset_pips: f64,

    pub enable_trailing: bool,
    pub trailing_activation_pips: f64,
    pub trailing_stop_pips: f64,
    pub trailing_min_change_pips: f64,
    pub trailing_cooldown: Duration,

    pub enable_addon: bool,
    pub addon_max: u32,
    pub addon_lot_factor: f64,
    pub addon_min_seconds_from_open: u64,
    pub addon_entry_sl_ratio: f64,

    pub scaling_tramo_pips: f64,
    pub scaling_percent_per_tramo: u8,
    pub trailing_last_tramo_pips: f64,

    pub torofx_partial_default_percent: u8,
    pub torofx_partial_min_pips: f64,
    pub torofx_close_entry_tolerance_pips: f64,

    /// Pip progress arming be_pips / be_pnl when the account sets none.
    pub default_be_pips: f64,
    pub reentry_grace: Duration,
    pub reentry_volume_factor: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            loop_sleep: Duration::from_secs(1),
            scalp_tp1_percent: 50,
            scalp_tp2_percent: 80,
            long_tp1_percent: 50,
            long_tp2_percent: 80,
            runner_retrace_pips: 20.0,
            buffer_pips: 2.0,
            enable_be_after_tp1: true,
            be_offset_pips: 0.0,
            enable_trailing: true,
            trailing_activation_pips: 30.0,
            trailing_stop_pips: 20.0,
            trailing_min_change_pips: 1.0,
            trailing_cooldown: Duration::from_secs(2),
            enable_addon: true,
            addon_max: 1,
            addon_lot_factor: 0.5,
            addon_min_seconds_from_open: 5,
            addon_entry_sl_ratio: 0.5,
            scaling_tramo_pips: 40.0,
            scaling_percent_per_tramo: 25,
            trailing_last_tramo_pips: 40.0,
            torofx_partial_default_percent: 30,
            torofx_partial_min_pips: 30.0,
            torofx_close_entry_tolerance_pips: 10.0,
            default_be_pips: 30.0,
            reentry_grace: Duration::from_secs(3),
            reentry_volume_factor: 0.3,
        }
    }
}

impl ManagerConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            loop_sleep: Duration::from_secs_f64(s.loop_sleep_sec),
            scalp_tp1_percent: s.scalp_tp1_percent,
            scalp_tp2_percent: s.scalp_tp2_percent,
            long_tp1_percent: s.long_tp1_percent,
            long_tp2_percent: s.long_tp2_percent,
            runner_retrace_pips: s.runner_retrace_pips,
            buffer_pips: s.buffer_pips,
            enable_be_after_tp1: s.enable_breakeven,
            be_offset_pips: s.breakeven_offset_pips,
            enable_trailing: s.enable_trailing,
            trailing_activation_pips: s.trailing_activation_pips,
            trailing_stop_pips: s.trailing_stop_pips,
            trailing_min_change_pips: s.trailing_min_change_pips,
            trailing_cooldown: Duration::from_secs_f64(s.trailing_cooldown_sec),
            enable_addon: s.enable_addon,
            addon_max: s.addon_max_count,
            addon_lot_factor: s.addon_lot_factor,
            addon_min_seconds_from_open: s.addon_min_seconds_from_open,
            addon_entry_sl_ratio: s.addon_entry_sl_ratio,
            scaling_tramo_pips: s.scaling_tramo_pips,
            scaling_percent_per_tramo: s.scaling_percent_per_tramo,
            trailing_last_tramo_pips: s.trailing_last_tramo_pips,
            torofx_partial_default_percent: s.torofx_partial_default_percent,
            torofx_partial_min_pips: s.torofx_partial_min_pips,
            torofx_close_entry_tolerance_pips: s.torofx_close_entry_tolerance_pips,
            ..Self::default()
        }
    }
}

/// Snapshot handed to the per-trade handlers for one tick.
pub(crate) struct TickCtx<'a> {
    pub account: &'a AccountConfig,
    pub pos: &'a PositionInfo,
    pub info: &'a SymbolInfo,
    pub current: f64,
}

impl TickCtx<'_> {
    pub fn is_buy(&self) -> bool {
        self.pos.direction() == Direction::Buy
    }
}

pub struct TradeManager {
    pub(crate) executor: Arc<Mt5Executor>,
    pub(crate) registry: TradeRegistry,
    pub(crate) cfg: ManagerConfig,
    pub(crate) events: EventSink,
    pub(crate) bus: Option<Bus>,
    pub(crate) momentum_filter: Option<MomentumFilter>,
}

impl TradeManager {
    pub fn new(
        executor: Arc<Mt5Executor>,
        registry: TradeRegistry,
        cfg: ManagerConfig,
        events: EventSink,
    ) -> Self {
        Self {
            executor,
            registry,
            cfg,
            events,
            bus: None,
            momentum_filter: None,
        }
    }

    /// Attach the bus used for the daily PnL tally.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_momentum_filter(mut self, filter: MomentumFilter) -> Self {
        self.momentum_filter = Some(filter);
        self
    }

    pub fn registry(&self) -> &TradeRegistry {
        &self.registry
    }

    /// Supervision loop. Call from `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        info!("TradeManager loop running");
        loop {
            let accounts: Vec<AccountConfig> = self
                .executor
                .accounts()
                .iter()
                .filter(|a| a.active)
                .cloned()
                .collect();
            join_all(accounts.iter().map(|account| async {
                if let Err(e) = self.tick_account(account).await {
                    debug!(account = %account.name, error = %e, "tick failed — reconnecting next round");
                    self.executor.evict_client(&account.name).await;
                }
            }))
            .await;
            sleep(self.cfg.loop_sleep).await;
        }
    }

    /// One supervision pass over a single account.
    pub async fn tick_account(&self, account: &AccountConfig) -> Result<()> {
        let client = self.executor.client_for(account).await?;
        let positions = client.positions_get(None).await?;

        let ours: HashMap<u64, PositionInfo> = positions
            .into_iter()
            .filter(|p| p.magic == self.executor.magic())
            .map(|p| (p.ticket, p))
            .collect();
        let live: HashSet<u64> = ours.keys().copied().collect();

        // Tickets the broker no longer reports were closed out-of-band
        // (SL, TP, manual, broker action).
        for gone in self.registry.remove_missing(&account.name, &live).await {
            info!(
                account = %account.name,
                ticket = gone.ticket,
                symbol = %gone.symbol,
                tp_hit = ?gone.tp_hit,
                "position disappeared from broker — closed externally"
            );
            self.events.emit(TradeEvent::TradeClosed {
                account: account.name.clone(),
                ticket: gone.ticket,
                symbol: gone.symbol.clone(),
                reason: "closed on broker".to_string(),
                profit: None,
            });
        }

        // Unknown positions carrying our magic: a restart lost their state.
        // Re-register them with no TP schedule; general mode will at least
        // trail and honour management messages.
        for pos in ours.values() {
            if !self.registry.contains(&account.name, pos.ticket).await {
                self.adopt_position(account, pos, &client).await;
            }
        }

        for ticket in self.registry.tickets_for(&account.name).await {
            let Some(pos) = ours.get(&ticket) else { continue };
            let Some(info) = client.symbol_info(&pos.symbol).await? else {
                continue;
            };
            if client.symbol_info_tick(&pos.symbol).await?.is_none() {
                continue;
            }

            self.registry
                .update(&account.name, ticket, |t| {
                    if t.entry_price.is_none() {
                        t.entry_price = Some(pos.price_open);
                    }
                    if t.initial_volume.is_none() {
                        t.initial_volume = Some(pos.volume);
                    }
                })
                .await;

            let ctx = TickCtx {
                account,
                pos,
                info: &info,
                current: pos.price_current,
            };
            let outcome = match account.trading_mode {
                TradingMode::General => self.manage_general(&ctx, ticket).await,
                TradingMode::BePips => self.manage_be_pips(&ctx, ticket).await,
                TradingMode::BePnl => self.manage_be_pnl(&ctx, ticket).await,
                TradingMode::Reentry => self.manage_reentry(&ctx, ticket).await,
            };
            if let Err(e) = outcome {
                error!(account = %account.name, ticket = ticket, error = %e, "trade management failed");
            }
        }
        Ok(())
    }

    async fn adopt_position(
        &self,
        account: &AccountConfig,
        pos: &PositionInfo,
        client: &Arc<dyn executor::Mt5Bridge>,
    ) {
        let planned_sl = if pos.sl != 0.0 {
            pos.sl
        } else {
            let point = client
                .symbol_info(&pos.symbol)
                .await
                .ok()
                .flatten()
                .map(|i| i.point)
                .unwrap_or(0.01);
            default_sl_price(&pos.symbol, pos.direction(), pos.price_current, point, 100.0)
        };
        warn!(
            account = %account.name,
            ticket = pos.ticket,
            symbol = %pos.symbol,
            "adopting untracked position (restart recovery)"
        );
        self.registry
            .register(ManagedTrade::new(
                &account.name,
                pos.ticket,
                &pos.symbol,
                pos.direction(),
                "RECOVERED",
                Vec::new(),
                planned_sl,
                None,
            ))
            .await;
    }

    /// Close `percent` of a position and emit the audit trail. Returns true
    /// when the broker volume actually moved.
    pub(crate) async fn do_partial_close(
        &self,
        account: &AccountConfig,
        ticket: u64,
        percent: u8,
        reason: &str,
    ) -> Result<bool> {
        let client = self.executor.client_for(account).await?;
        let before = client.positions_get(Some(ticket)).await?;
        let Some(before_pos) = before.into_iter().next() else {
            return Ok(false);
        };

        self.executor
            .partial_close(account, ticket, percent as f64)
            .await?;

        let after = client.positions_get(Some(ticket)).await?;
        let volume_after = after.first().map(|p| p.volume).unwrap_or(0.0);
        let delta = before_pos.volume - volume_after;
        if delta <= 1e-9 {
            error!(
                account = %account.name,
                ticket = ticket,
                percent = percent,
                reason = reason,
                "partial close did not change the position volume"
            );
            return Ok(false);
        }

        info!(
            account = %account.name,
            ticket = ticket,
            percent = percent,
            closed = delta,
            reason = reason,
            "partial close done"
        );
        self.events.emit(TradeEvent::PartialClosed {
            account: account.name.clone(),
            ticket,
            symbol: before_pos.symbol.clone(),
            percent,
            closed_volume: delta,
            price: before_pos.price_current,
            reason: reason.to_string(),
        });

        if after.is_empty() {
            if let Some(trade) = self.registry.get(&account.name, ticket).await {
                self.audit_close(account, &trade, reason, Some(before_pos.profit))
                    .await;
            }
        }
        Ok(true)
    }

    /// Closure summary: log, event, and the daily PnL tally in Redis.
    pub(crate) async fn audit_close(
        &self,
        account: &AccountConfig,
        trade: &ManagedTrade,
        reason: &str,
        profit: Option<f64>,
    ) {
        info!(
            account = %account.name,
            ticket = trade.ticket,
            symbol = %trade.symbol,
            direction = %trade.direction,
            provider = %trade.provider_tag,
            group = trade.group_id,
            entry = ?trade.entry_price,
            tp_hit = ?trade.tp_hit,
            runner = trade.runner_enabled,
            reason = reason,
            profit = ?profit,
            "trade closed"
        );
        self.events.emit(TradeEvent::TradeClosed {
            account: account.name.clone(),
            ticket: trade.ticket,
            symbol: trade.symbol.clone(),
            reason: reason.to_string(),
            profit,
        });
        if let (Some(bus), Some(pnl)) = (&self.bus, profit) {
            let day = chrono::Utc::now().format("%Y%m%d");
            let key = format!("pnl:{}:{day}", account.name);
            if let Err(e) = bus.incr_float(&key, pnl).await {
                warn!(key = %key, error = %e, "PnL tally update failed");
            }
        }
    }

    /// Command-driven break-even (mirrors the automatic post-TP1 path).
    pub async fn apply_breakeven(&self, account: &AccountConfig, ticket: u64) -> Result<bool> {
        self.do_be(account, ticket, None).await
    }

    /// Close every live FAST position matching symbol and direction; used
    /// when the refining complete signal arrives with its TP1 already gone.
    pub async fn close_fast_trades(
        &self,
        symbol: &str,
        direction: Direction,
        reason: &str,
    ) -> Result<usize> {
        let mut closed = 0;
        for trade in self
            .registry
            .find_by_provider("GB_FAST", symbol, direction)
            .await
        {
            let Some(account) = self.executor.account_by_name(&trade.account_name).cloned() else {
                continue;
            };
            if self
                .do_partial_close(&account, trade.ticket, 100, reason)
                .await?
            {
                closed += 1;
            }
        }
        Ok(closed)
    }

    /// Retarget live FAST positions with the levels of the complete signal
    /// that followed them. Updates the broker SL and the in-memory schedule;
    /// no new order is opened. Returns the retargeted tickets.
    pub async fn apply_signal_upgrade(&self, signal: &ParsedSignal) -> Vec<u64> {
        let fast_trades = self
            .registry
            .find_by_provider("GB_FAST", &signal.symbol, signal.direction)
            .await;
        let mut upgraded = Vec::new();
        for trade in fast_trades {
            let Some(account) = self.executor.account_by_name(&trade.account_name).cloned() else {
                continue;
            };
            let new_sl = signal.sl.unwrap_or(trade.planned_sl);
            if new_sl > 0.0 {
                match self
                    .executor
                    .modify_sl(&account, trade.ticket, new_sl, "full-signal")
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!(ticket = trade.ticket, "upgrade SL not confirmed"),
                    Err(e) => {
                        warn!(ticket = trade.ticket, error = %e, "upgrade SL failed");
                        continue;
                    }
                }
            }
            self.registry
                .update(&trade.account_name, trade.ticket, |t| {
                    t.tps = signal.tps.clone();
                    if new_sl > 0.0 {
                        t.planned_sl = new_sl;
                    }
                    t.provider_tag = signal.provider_tag.clone();
                })
                .await;
            info!(
                ticket = trade.ticket,
                account = %trade.account_name,
                sl = new_sl,
                tps = ?signal.tps,
                "FAST trade upgraded by complete signal"
            );
            upgraded.push(trade.ticket);
        }
        upgraded
    }
}
