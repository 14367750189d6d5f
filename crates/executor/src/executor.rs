//! Multi-account order execution against pooled MT5 bridges.
//!
//! Orders for one signal go out to every eligible account in parallel, each
//! under its own 30 s budget; one account failing (or never reaching its
//! entry band) never cancels the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use common::pips::{default_sl_price, is_gold, pips_to_price};
use common::timewindow::{in_windows, Window};
use common::{AccountConfig, Direction, Error, Result};

use crate::bridge::{tick_price, BridgeConnector, BridgePool, Mt5Bridge};
use crate::lots;
use crate::types::*;

/// Admissible overshoot past the signalled entry range.
const ENTRY_BAND_EXTENSION_PIPS: f64 = 15.0;
/// Tolerance when confirming an applied SL against the broker.
const SL_VERIFY_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub magic: i64,
    pub deviation: i64,
    pub comment_prefix: String,
    /// Empty = no window restriction.
    pub windows: Vec<Window>,
    pub entry_wait_seconds: u64,
    pub entry_poll_ms: u64,
    pub entry_buffer_points: f64,
    pub default_sl_xauusd_pips: f64,
    pub default_sl_pips: f64,
    /// Symbol → forced filling mode, for brokers known to reject the rest.
    pub filling_overrides: HashMap<String, i64>,
    pub account_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            magic: 624011,
            deviation: 50,
            comment_prefix: "MirrorCopy".to_string(),
            windows: Vec::new(),
            entry_wait_seconds: 60,
            entry_poll_ms: 500,
            entry_buffer_points: 0.0,
            default_sl_xauusd_pips: 300.0,
            default_sl_pips: 100.0,
            filling_overrides: HashMap::new(),
            account_timeout: Duration::from_secs(30),
        }
    }
}

/// Trade intent as handed to `open_complete_trade`.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub provider_tag: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_range: Option<(f64, f64)>,
    /// 0.0 = compute the default SL from the fill price.
    pub sl: f64,
    pub tps: Vec<f64>,
    /// Restrict to these account names (on top of the active/channel filter).
    pub accounts: Option<Vec<String>>,
    pub source_channel: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenedOrder {
    pub ticket: u64,
    pub price: f64,
    /// The SL actually sent, after fallback and stop-distance clamping.
    pub sl: f64,
    pub volume: f64,
}

#[derive(Debug, Default)]
pub struct OpenOutcome {
    pub tickets_by_account: HashMap<String, OpenedOrder>,
    pub errors_by_account: HashMap<String, String>,
}

pub struct Mt5Executor {
    accounts: Vec<AccountConfig>,
    pool: BridgePool,
    cfg: ExecutorConfig,
}

impl Mt5Executor {
    pub fn new(
        accounts: Vec<AccountConfig>,
        connector: Arc<dyn BridgeConnector>,
        cfg: ExecutorConfig,
    ) -> Self {
        Self {
            accounts,
            pool: BridgePool::new(connector),
            cfg,
        }
    }

    pub fn accounts(&self) -> &[AccountConfig] {
        &self.accounts
    }

    pub fn account_by_name(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.cfg
    }

    pub fn magic(&self) -> i64 {
        self.cfg.magic
    }

    pub async fn client_for(&self, account: &AccountConfig) -> Result<Arc<dyn Mt5Bridge>> {
        self.pool.client_for(account).await
    }

    /// Drop the pooled bridge so the next call reconnects.
    pub async fn evict_client(&self, account_name: &str) {
        self.pool.evict(account_name).await;
    }

    /// Preinstall a bridge for an account (tests, paper mode).
    pub async fn install_client(&self, account_name: &str, bridge: Arc<dyn Mt5Bridge>) {
        self.pool.insert(account_name, bridge).await;
    }

    fn eligible_accounts(&self, req: &OpenRequest) -> Vec<AccountConfig> {
        self.accounts
            .iter()
            .filter(|a| a.active)
            .filter(|a| match req.source_channel {
                Some(ch) => a.accepts_channel(ch),
                None => true,
            })
            .filter(|a| match &req.accounts {
                Some(names) => names.contains(&a.name),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Open the signal on every eligible account in parallel.
    pub async fn open_complete_trade(&self, req: &OpenRequest) -> OpenOutcome {
        let mut outcome = OpenOutcome::default();
        let eligible = self.eligible_accounts(req);

        info!(
            provider = %req.provider_tag,
            symbol = %req.symbol,
            direction = %req.direction,
            entry = ?req.entry_range,
            sl = req.sl,
            accounts = eligible.len(),
            "open_complete_trade start"
        );

        if !self.cfg.windows.is_empty() && !in_windows(&self.cfg.windows) {
            for account in &eligible {
                outcome
                    .errors_by_account
                    .insert(account.name.clone(), "outside trading windows".to_string());
            }
            return outcome;
        }

        let attempts = eligible.iter().map(|account| async move {
            let result = timeout(self.cfg.account_timeout, self.open_on_account(account, req)).await;
            let result = match result {
                Ok(Ok(opened)) => Ok(opened),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "timed out after {}s",
                    self.cfg.account_timeout.as_secs()
                )),
            };
            (account.name.clone(), result)
        });

        for (name, result) in join_all(attempts).await {
            match result {
                Ok(opened) => {
                    info!(account = %name, ticket = opened.ticket, volume = opened.volume, "order filled");
                    outcome.tickets_by_account.insert(name, opened);
                }
                Err(error) => {
                    warn!(account = %name, error = %error, "order failed");
                    outcome.errors_by_account.insert(name, error);
                }
            }
        }
        outcome
    }

    async fn open_on_account(
        &self,
        account: &AccountConfig,
        req: &OpenRequest,
    ) -> Result<OpenedOrder> {
        let client = self.pool.client_for(account).await?;
        client.symbol_select(&req.symbol, true).await?;
        let info = client
            .symbol_info(&req.symbol)
            .await?
            .ok_or_else(|| Error::Bridge(format!("symbol {} unavailable", req.symbol)))?;

        let mut price = tick_price(client.as_ref(), &req.symbol, req.direction).await?;
        if price <= 0.0 {
            return Err(Error::Bridge(format!(
                "no quote for {} (symbol unavailable or market closed)",
                req.symbol
            )));
        }

        if let Some((lo, hi)) = req.entry_range {
            price = self
                .wait_for_entry(client.as_ref(), &req.symbol, req.direction, lo, hi, &info)
                .await?;
        }

        let mut sl = req.sl;
        if sl == 0.0 {
            let pips = if is_gold(&req.symbol) {
                self.cfg.default_sl_xauusd_pips
            } else {
                self.cfg.default_sl_pips
            };
            sl = default_sl_price(&req.symbol, req.direction, price, info.point, pips);
            warn!(account = %account.name, sl = sl, "no SL on signal — using default distance");
        }
        sl = clamp_sl_for_entry(req.direction, price, sl, &info);

        let balance = if account.fixed_lot > 0.0 {
            0.0
        } else {
            client.account_info().await.map(|a| a.balance).unwrap_or(0.0)
        };
        let volume = lots::size_lot(account, balance, price, sl, &info);

        let order = OrderRequest {
            action: ACTION_DEAL,
            symbol: req.symbol.clone(),
            volume,
            order_type: order_type_for(req.direction),
            price,
            sl,
            tp: 0.0,
            deviation: self.cfg.deviation,
            magic: self.cfg.magic,
            comment: safe_comment(&self.cfg.comment_prefix, &req.provider_tag),
            type_time: ORDER_TIME_GTC,
            type_filling: 0,
            position: None,
        };

        let result = self
            .send_with_filling_fallback(client.as_ref(), order, &info, &req.symbol)
            .await?;

        Ok(OpenedOrder {
            ticket: result.order,
            price,
            sl,
            volume,
        })
    }

    /// Poll the live tick until it enters the admissible band or the entry
    /// window expires. A reference already beyond the far edge is rejected
    /// outright: the move has run away, there is nothing to wait for.
    async fn wait_for_entry(
        &self,
        client: &dyn Mt5Bridge,
        symbol: &str,
        direction: Direction,
        lo: f64,
        hi: f64,
        info: &SymbolInfo,
    ) -> Result<f64> {
        let extension = pips_to_price(symbol, ENTRY_BAND_EXTENSION_PIPS, info.point);
        let buffer = self.cfg.entry_buffer_points;
        let (band_lo, band_hi) = match direction {
            Direction::Buy => (lo - buffer, hi + extension + buffer),
            Direction::Sell => (lo - extension - buffer, hi + buffer),
        };

        let reference = tick_price(client, symbol, direction).await?;
        match direction {
            Direction::Buy if reference > band_hi => {
                return Err(Error::Bridge(format!(
                    "price {reference} already above entry band (≤ {band_hi})"
                )));
            }
            Direction::Sell if reference > 0.0 && reference < band_lo => {
                return Err(Error::Bridge(format!(
                    "price {reference} already below entry band (≥ {band_lo})"
                )));
            }
            _ => {}
        }
        if reference > 0.0 && reference >= band_lo && reference <= band_hi {
            return Ok(reference);
        }

        let deadline = Instant::now() + Duration::from_secs(self.cfg.entry_wait_seconds);
        while Instant::now() < deadline {
            sleep(Duration::from_millis(self.cfg.entry_poll_ms)).await;
            let px = tick_price(client, symbol, direction).await?;
            if px > 0.0 && px >= band_lo && px <= band_hi {
                return Ok(px);
            }
        }
        Err(Error::Bridge(format!(
            "entry not reached within {}s (band {band_lo}..{band_hi})",
            self.cfg.entry_wait_seconds
        )))
    }

    /// Send an order, retrying across filling modes when the broker answers
    /// with a fill-mode mismatch. A symbol override forces one mode;
    /// otherwise the advertised mode is tried first, then the fixed list.
    pub(crate) async fn send_with_filling_fallback(
        &self,
        client: &dyn Mt5Bridge,
        mut order: OrderRequest,
        info: &SymbolInfo,
        symbol: &str,
    ) -> Result<OrderResult> {
        let modes: Vec<i64> = match self.cfg.filling_overrides.get(symbol) {
            Some(mode) => vec![*mode],
            None => {
                let mut modes = vec![info.trade_fill_mode];
                for m in FILLING_FALLBACK {
                    if !modes.contains(&m) {
                        modes.push(m);
                    }
                }
                modes
            }
        };

        let mut last_retcode = 0;
        for mode in modes {
            order.type_filling = mode;
            let result = client.order_send(&order).await?;
            if retcode_ok(result.retcode) {
                return Ok(result);
            }
            if !retcode_is_fill_mismatch(result.retcode) {
                return Err(Error::Broker {
                    retcode: result.retcode,
                    comment: result.comment,
                });
            }
            warn!(symbol = symbol, filling = mode, retcode = result.retcode, "filling mode rejected");
            last_retcode = result.retcode;
        }
        Err(Error::Broker {
            retcode: last_retcode,
            comment: "no filling mode accepted".to_string(),
        })
    }

    /// Single-account follow-up order (reentry runner, addon recovery).
    /// Unlike signal opens it carries a broker-side TP.
    pub async fn open_runner_trade(
        &self,
        account: &AccountConfig,
        symbol: &str,
        direction: Direction,
        volume: f64,
        sl: f64,
        tp: f64,
        provider_tag: &str,
    ) -> Result<OpenedOrder> {
        let client = self.pool.client_for(account).await?;
        client.symbol_select(symbol, true).await?;
        let info = client
            .symbol_info(symbol)
            .await?
            .ok_or_else(|| Error::Bridge(format!("symbol {symbol} unavailable")))?;
        let price = tick_price(client.as_ref(), symbol, direction).await?;
        if price <= 0.0 {
            return Err(Error::Bridge(format!("no quote for {symbol}")));
        }
        let sl = clamp_sl_for_entry(direction, price, sl, &info);

        let order = OrderRequest {
            action: ACTION_DEAL,
            symbol: symbol.to_string(),
            volume,
            order_type: order_type_for(direction),
            price,
            sl,
            tp,
            deviation: self.cfg.deviation,
            magic: self.cfg.magic,
            comment: safe_comment(&self.cfg.comment_prefix, provider_tag),
            type_time: ORDER_TIME_GTC,
            type_filling: 0,
            position: None,
        };
        let result = self
            .send_with_filling_fallback(client.as_ref(), order, &info, symbol)
            .await?;
        info!(account = %account.name, ticket = result.order, volume = volume, "runner order filled");
        Ok(OpenedOrder {
            ticket: result.order,
            price,
            sl,
            volume,
        })
    }

    /// Move the SL of an open position, clamped to the broker's minimum stop
    /// distance, and confirm the terminal actually applied it.
    pub async fn modify_sl(
        &self,
        account: &AccountConfig,
        ticket: u64,
        new_sl: f64,
        reason: &str,
    ) -> Result<bool> {
        let client = self.pool.client_for(account).await?;
        let pos = client
            .positions_get(Some(ticket))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bridge(format!("position {ticket} not found")))?;
        let info = client
            .symbol_info(&pos.symbol)
            .await?
            .ok_or_else(|| Error::Bridge(format!("symbol {} unavailable", pos.symbol)))?;

        let sl = clamp_sl_for_position(&pos, new_sl, &info);
        let order = OrderRequest {
            action: ACTION_SLTP,
            symbol: pos.symbol.clone(),
            volume: 0.0,
            order_type: order_type_for(pos.direction()),
            price: 0.0,
            sl,
            tp: pos.tp,
            deviation: self.cfg.deviation,
            magic: self.cfg.magic,
            comment: safe_comment(&self.cfg.comment_prefix, reason),
            type_time: ORDER_TIME_GTC,
            type_filling: 0,
            position: Some(ticket),
        };
        self.send_with_filling_fallback(client.as_ref(), order, &info, &pos.symbol)
            .await?;

        // Confirm the terminal reflects the new SL before reporting success.
        for attempt in 0..3u8 {
            let check = client.positions_get(Some(ticket)).await?;
            if let Some(p) = check.first() {
                if (p.sl - sl).abs() <= SL_VERIFY_TOLERANCE {
                    info!(account = %account.name, ticket = ticket, sl = sl, reason = reason, "SL modified");
                    return Ok(true);
                }
            }
            if attempt < 2 {
                sleep(Duration::from_millis(200)).await;
            }
        }
        warn!(account = %account.name, ticket = ticket, sl = sl, "SL modification not reflected");
        Ok(false)
    }

    /// Close `percent` of a position with a counter order at the opposite
    /// tick. Volume is floored to the step and promoted to 100% when the
    /// closable or residual part would fall under the minimum.
    pub async fn partial_close(
        &self,
        account: &AccountConfig,
        ticket: u64,
        percent: f64,
    ) -> Result<bool> {
        let client = self.pool.client_for(account).await?;
        let pos = client
            .positions_get(Some(ticket))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bridge(format!("position {ticket} not found")))?;
        let info = client
            .symbol_info(&pos.symbol)
            .await?
            .ok_or_else(|| Error::Bridge(format!("symbol {} unavailable", pos.symbol)))?;

        let close_volume = common::pips::partial_close_volume(
            pos.volume,
            percent,
            info.volume_step,
            info.volume_min,
        );
        if close_volume <= 0.0 {
            return Ok(false);
        }
        let tick = client
            .symbol_info_tick(&pos.symbol)
            .await?
            .ok_or_else(|| Error::Bridge(format!("no quote for {}", pos.symbol)))?;

        let order = OrderRequest {
            action: ACTION_DEAL,
            symbol: pos.symbol.clone(),
            volume: close_volume,
            order_type: order_type_for(pos.direction().opposite()),
            price: tick.close_price(pos.direction()),
            sl: 0.0,
            tp: 0.0,
            deviation: self.cfg.deviation,
            magic: self.cfg.magic,
            comment: safe_comment(&self.cfg.comment_prefix, "partial"),
            type_time: ORDER_TIME_GTC,
            type_filling: 0,
            position: Some(ticket),
        };
        self.send_with_filling_fallback(client.as_ref(), order, &info, &pos.symbol)
            .await?;
        info!(account = %account.name, ticket = ticket, volume = close_volume, percent = percent, "partial close sent");
        Ok(true)
    }

    /// Close `fraction` of the position and move the SL to the entry price.
    pub async fn early_partial_close(
        &self,
        account: &AccountConfig,
        ticket: u64,
        fraction: f64,
        reason: &str,
    ) -> Result<bool> {
        let client = self.pool.client_for(account).await?;
        let pos = client
            .positions_get(Some(ticket))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bridge(format!("position {ticket} not found")))?;
        let entry = pos.price_open;

        if !self
            .partial_close(account, ticket, (fraction * 100.0).clamp(1.0, 100.0))
            .await?
        {
            return Ok(false);
        }
        // The residual (if any) rides risk-free from here.
        match self.modify_sl(account, ticket, entry, reason).await {
            Ok(applied) => Ok(applied),
            Err(Error::Bridge(_)) => Ok(true), // fully closed — nothing left to modify
            Err(e) => Err(e),
        }
    }
}

/// Push an entry SL to the nearest admissible value on the correct side of
/// the fill price.
pub fn clamp_sl_for_entry(direction: Direction, price: f64, sl: f64, info: &SymbolInfo) -> f64 {
    let min_stop = info.min_stop_distance();
    match direction {
        Direction::Buy if sl > price - min_stop => price - min_stop,
        Direction::Sell if sl < price + min_stop => price + min_stop,
        _ => sl,
    }
}

/// Same rule for SL modifications, against the live price.
pub fn clamp_sl_for_position(pos: &PositionInfo, sl: f64, info: &SymbolInfo) -> f64 {
    let min_stop = info.min_stop_distance();
    if min_stop <= 0.0 {
        return sl;
    }
    let price = pos.price_current;
    match pos.direction() {
        Direction::Buy if sl > price - min_stop => price - min_stop,
        Direction::Sell if sl < price + min_stop => price + min_stop,
        _ => sl,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn info(stops_level: f64) -> SymbolInfo {
        SymbolInfo {
            point: 0.01,
            digits: 2,
            volume_step: 0.01,
            volume_min: 0.01,
            volume_max: 100.0,
            tick_value: 1.0,
            tick_size: 0.01,
            stops_level,
            spread: 20.0,
            trade_fill_mode: FILLING_IOC,
        }
    }

    #[test]
    fn entry_sl_clamped_to_min_stop() {
        // Broker wants 30 points = 0.30; SL 4459.9 is too close to 4460.
        let sl = clamp_sl_for_entry(Direction::Buy, 4460.0, 4459.9, &info(30.0));
        assert!((sl - 4459.7).abs() < 1e-9);
        // Far SL untouched
        let sl = clamp_sl_for_entry(Direction::Buy, 4460.0, 4454.0, &info(30.0));
        assert_eq!(sl, 4454.0);
        // Sell side pushes upward
        let sl = clamp_sl_for_entry(Direction::Sell, 4460.0, 4460.1, &info(30.0));
        assert!((sl - 4460.3).abs() < 1e-9);
    }

    #[test]
    fn wrong_side_sl_forced_across() {
        // A BUY stop above the price lands at price - min_stop.
        let sl = clamp_sl_for_entry(Direction::Buy, 4460.0, 4465.0, &info(30.0));
        assert!((sl - 4459.7).abs() < 1e-9);
    }
}
