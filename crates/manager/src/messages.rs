//! Provider management messages: follow-up chatter that drives actions on
//! already-open positions. Every action is tagged in the trade's
//! `actions_done` set so a repeated or re-delivered message cannot fire it
//! twice (the bus is at-least-once).

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use common::pips::{pips_to_price, profit_pips};
use common::{AccountConfig, Direction, MgmtMessage, ProviderHint, Result};
use executor::types::PositionInfo;

use crate::manager::TradeManager;
use crate::trade::ManagedTrade;

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,3})\s*%").unwrap());
// "+30" or "+50/60"; the lower bound is the gate.
static PIPS_GATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+(\d{1,4})(?:\s*/\s*(\d{1,4}))?").unwrap());
static PRICE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{3,5}(?:\.\d+)?)\b").unwrap());

fn contains_any(up: &str, words: &[&str]) -> bool {
    words.iter().any(|w| up.contains(w))
}

impl TradeManager {
    pub async fn handle_management(&self, msg: &MgmtMessage) -> Result<()> {
        match msg.provider_hint {
            Some(ProviderHint::Torofx) => {
                self.handle_torofx_management(&msg.text).await?;
            }
            Some(ProviderHint::Hannah) => {
                self.handle_hannah_management(&msg.text).await?;
            }
            Some(ProviderHint::GoldBrothers) | None => {
                // Gold Brothers follow-ups are informational for now.
                debug!(chat = msg.chat_id, "management pass-through");
            }
        }
        Ok(())
    }

    /// ToroFX follow-ups:
    /// - "Asegurando profits… quitando riesgo" → break-even, once per trade.
    /// - "Cerrando el 50% … +30" → partial when profit ≥ the stated pips.
    /// - "cerrando mi entrada de 4330 y dejando 4325" → close by entry price.
    pub async fn handle_torofx_management(&self, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        let up = text.to_uppercase();

        let has_close = contains_any(&up, &["CERRANDO", "CERRAR", "CIERRO", "CERRARE"]);
        let has_partial = contains_any(&up, &["PARCIAL", "PARTIAL", "RECOGER", "COGER"]);
        let has_be = contains_any(
            &up,
            &[
                "BREAKEVEN",
                "BREAK EVEN",
                "BREAK-EVEN",
                "QUITANDO EL RIESGO",
                "QUITANDO RIESGO",
                "SIN RIESGO",
                "RISK OFF",
                "ASEGURANDO",
            ],
        );

        let percent = PERCENT
            .captures(text)
            .and_then(|c| c.get(1)?.as_str().parse::<u8>().ok())
            .map(|p| p.clamp(1, 100));
        let pips_gate = PIPS_GATE.captures(text).map(|c| {
            let a: f64 = c.get(1).map(|m| m.as_str().parse().unwrap_or(0.0)).unwrap_or(0.0);
            match c.get(2).and_then(|m| m.as_str().parse::<f64>().ok()) {
                Some(b) => a.min(b),
                None => a,
            }
        });
        let prices: Vec<f64> = PRICE
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();

        let wants_close_entry = up.contains("ENTRADA") && has_close && !prices.is_empty();
        let wants_be = has_be && !has_partial && !wants_close_entry;
        let wants_partial = (has_partial || (has_close && percent.is_some())) && !wants_close_entry;
        if !(wants_close_entry || wants_be || wants_partial) {
            return Ok(false);
        }

        for account in self.active_accounts() {
            for (trade, pos) in self.provider_trades(&account, "TOROFX").await? {
                if wants_close_entry {
                    let close_price = prices[0];
                    let keep_price = prices.get(1).copied();
                    let tolerance = pips_to_price(
                        &trade.symbol,
                        self.cfg.torofx_close_entry_tolerance_pips,
                        self.point_for(&account, &trade.symbol).await,
                    );
                    if let Some(keep) = keep_price {
                        if (pos.price_open - keep).abs() <= tolerance {
                            continue;
                        }
                    }
                    if (pos.price_open - close_price).abs() > tolerance {
                        continue;
                    }
                    let action = format!("TOROFX_CLOSE_ENTRY_{}", close_price as i64);
                    if !self.claim_action(&trade, &action).await {
                        continue;
                    }
                    info!(ticket = trade.ticket, entry = pos.price_open, "ToroFX: closing named entry");
                    self.do_partial_close(
                        &account,
                        trade.ticket,
                        100,
                        &format!("ToroFX close entry {close_price}"),
                    )
                    .await?;
                } else if wants_be {
                    if !self.claim_action(&trade, "TOROFX_BE").await {
                        continue;
                    }
                    info!(ticket = trade.ticket, "ToroFX: securing at break-even");
                    self.do_be(&account, trade.ticket, None).await?;
                } else if wants_partial {
                    let pct = percent.unwrap_or(self.cfg.torofx_partial_default_percent);
                    let needed = pips_gate.unwrap_or(self.cfg.torofx_partial_min_pips);
                    let point = self.point_for(&account, &trade.symbol).await;
                    let progress = profit_pips(
                        &trade.symbol,
                        trade.direction,
                        pos.price_open,
                        pos.price_current,
                        point,
                    );
                    if progress < needed {
                        continue;
                    }
                    let action = format!("TOROFX_PARTIAL_{pct}_AT_{}", needed as i64);
                    if !self.claim_action(&trade, &action).await {
                        continue;
                    }
                    info!(
                        ticket = trade.ticket,
                        percent = pct,
                        progress = progress,
                        "ToroFX: partial close"
                    );
                    self.do_partial_close(
                        &account,
                        trade.ticket,
                        pct,
                        &format!("ToroFX partial {pct}% at +{needed}"),
                    )
                    .await?;
                }
            }
        }
        Ok(true)
    }

    /// Hannah alerts: `close all`, `close half`, and `secure half + BE`.
    /// The last one only applies before TP1; when break-even is impossible
    /// because price is on the losing side, the trade closes in full.
    pub async fn handle_hannah_management(&self, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        let up = text.to_uppercase();

        if contains_any(&up, &["CLOSE ALL", "CLOSE ALL POSITIONS", "PRICE SPIKED"]) {
            let mut matched = false;
            for account in self.active_accounts() {
                for (trade, _pos) in self.provider_trades(&account, "HANNAH").await? {
                    if !self.claim_action(&trade, "HANNAH_CLOSE_ALL").await {
                        continue;
                    }
                    info!(ticket = trade.ticket, "Hannah: close-all alert");
                    self.do_partial_close(&account, trade.ticket, 100, "Hannah close all")
                        .await?;
                    matched = true;
                }
            }
            return Ok(matched);
        }

        if contains_any(&up, &["CLOSE HALF", "HALF GUYS", "HALF NOW", "HALF ONLY"]) {
            let mut matched = false;
            for account in self.active_accounts() {
                for (trade, _pos) in self.provider_trades(&account, "HANNAH").await? {
                    if !self.claim_action(&trade, "HANNAH_CLOSE_HALF").await {
                        continue;
                    }
                    info!(ticket = trade.ticket, "Hannah: close-half alert");
                    self.do_partial_close(&account, trade.ticket, 50, "Hannah close half")
                        .await?;
                    matched = true;
                }
            }
            return Ok(matched);
        }

        let has_partial = contains_any(
            &up,
            &["SECURE", "HALF", "PROFITS", "COLLECT", "CIERRA", "CIERRE", "PARCIAL"],
        );
        let has_be = contains_any(
            &up,
            &["BREAKEVEN", "BREAK EVEN", "BREAK-EVEN", "RISK FREE", "SIN RIESGO"],
        );
        if !(has_partial && has_be) {
            return Ok(false);
        }
        let pct = PERCENT
            .captures(text)
            .and_then(|c| c.get(1)?.as_str().parse::<u8>().ok())
            .map(|p| p.clamp(1, 100))
            .unwrap_or(50);

        let mut matched = false;
        for account in self.active_accounts() {
            for (trade, pos) in self.provider_trades(&account, "HANNAH").await? {
                // TP1 already banked: the normal schedule owns this trade.
                if trade.tp_hit.contains(&1) {
                    continue;
                }
                let action = format!("HANNAH_PARTIAL_BE_{pct}");
                if !self.claim_action(&trade, &action).await {
                    continue;
                }

                let adverse = match trade.direction {
                    Direction::Buy => pos.price_current < pos.price_open,
                    Direction::Sell => pos.price_current > pos.price_open,
                };
                if adverse {
                    info!(
                        ticket = trade.ticket,
                        "Hannah: break-even impossible below entry — closing in full"
                    );
                    self.do_partial_close(&account, trade.ticket, 100, "Hannah close (BE impossible)")
                        .await?;
                } else {
                    info!(ticket = trade.ticket, percent = pct, "Hannah: secure partial + BE");
                    self.do_partial_close(&account, trade.ticket, pct, "Hannah secure partial")
                        .await?;
                    self.do_be(&account, trade.ticket, None).await?;
                }
                matched = true;
            }
        }
        Ok(matched)
    }

    fn active_accounts(&self) -> Vec<AccountConfig> {
        self.executor
            .accounts()
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect()
    }

    /// Registered trades of `provider` on `account` that are still live on
    /// the broker with our magic, paired with their current position.
    async fn provider_trades(
        &self,
        account: &AccountConfig,
        provider: &str,
    ) -> Result<Vec<(ManagedTrade, PositionInfo)>> {
        let client = self.executor.client_for(account).await?;
        let positions = client.positions_get(None).await?;
        let mut out = Vec::new();
        for trade in self.registry.all_for_account(&account.name).await {
            if !trade.provider_tag.to_uppercase().contains(provider) {
                continue;
            }
            let Some(pos) = positions
                .iter()
                .find(|p| p.ticket == trade.ticket && p.magic == self.executor.magic())
            else {
                continue;
            };
            out.push((trade, pos.clone()));
        }
        Ok(out)
    }

    /// Atomically record an at-most-once action; false when already taken.
    async fn claim_action(&self, trade: &ManagedTrade, action: &str) -> bool {
        self.registry
            .update(&trade.account_name, trade.ticket, |t| {
                t.actions_done.insert(action.to_string())
            })
            .await
            .unwrap_or(false)
    }

    async fn point_for(&self, account: &AccountConfig, symbol: &str) -> f64 {
        match self.executor.client_for(account).await {
            Ok(client) => client
                .symbol_info(symbol)
                .await
                .ok()
                .flatten()
                .map(|i| i.point)
                .unwrap_or(0.01),
            Err(_) => 0.01,
        }
    }
}
