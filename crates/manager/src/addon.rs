//! Midpoint addon: a bounded additional entry when price retraces into the
//! zone between the original entry and the SL (never a pyramid into profit).

use common::pips::pips_to_price;
use common::{Result, TradeEvent};

use crate::manager::{TickCtx, TradeManager};
use crate::trade::ManagedTrade;

impl TradeManager {
    /// Command-driven addon: open `volume` on top of an existing trade,
    /// sharing its group, SL and provider tag.
    pub async fn manual_addon(
        &self,
        account: &common::AccountConfig,
        ticket: u64,
        volume: f64,
    ) -> Result<u64> {
        let trade = self
            .registry
            .get(&account.name, ticket)
            .await
            .ok_or_else(|| common::Error::Other(format!("ticket {ticket} is not tracked")))?;
        let tag = format!("{}-ADDON", trade.provider_tag);
        let opened = self
            .executor
            .open_runner_trade(
                account,
                &trade.symbol,
                trade.direction,
                volume,
                trade.planned_sl,
                0.0,
                &tag,
            )
            .await?;
        self.registry
            .incr_addon_count(&account.name, trade.group_id)
            .await;
        self.registry
            .register(ManagedTrade::new(
                &account.name,
                opened.ticket,
                &trade.symbol,
                trade.direction,
                &tag,
                trade.tps.clone(),
                trade.planned_sl,
                Some(trade.group_id),
            ))
            .await;
        self.events.emit(TradeEvent::AddonOpened {
            account: account.name.clone(),
            ticket: opened.ticket,
            base_ticket: ticket,
            group: trade.group_id,
            price: opened.price,
            volume,
        });
        Ok(opened.ticket)
    }

    pub(crate) async fn maybe_addon(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        if !self.cfg.enable_addon || self.cfg.addon_max == 0 {
            return Ok(());
        }
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        if trade.is_addon() {
            return Ok(());
        }
        if trade.opened_at.elapsed().as_secs() < self.cfg.addon_min_seconds_from_open {
            return Ok(());
        }
        let used = self
            .registry
            .addon_count(&ctx.account.name, trade.group_id)
            .await;
        if used >= self.cfg.addon_max {
            return Ok(());
        }

        let entry = ctx.pos.price_open;
        let sl = if ctx.pos.sl != 0.0 {
            ctx.pos.sl
        } else {
            trade.planned_sl
        };
        if sl == 0.0 {
            return Ok(());
        }
        let is_buy = ctx.is_buy();
        // SL must sit on the losing side, or the midpoint is meaningless.
        if (is_buy && entry <= sl) || (!is_buy && entry >= sl) {
            return Ok(());
        }

        let r = self.cfg.addon_entry_sl_ratio.clamp(0.0, 1.0);
        let addon_level = (1.0 - r) * entry + r * sl;
        let buffer = pips_to_price(&trade.symbol, self.cfg.buffer_pips, ctx.info.point);

        let current = ctx.current;
        let triggered = if is_buy {
            current <= addon_level + buffer
        } else {
            current >= addon_level - buffer
        };
        if !triggered {
            return Ok(());
        }
        // Too close to the stop: the retrace is a failure, not an entry.
        if is_buy && current <= sl + 2.0 * buffer {
            return Ok(());
        }
        if !is_buy && current >= sl - 2.0 * buffer {
            return Ok(());
        }

        let mut volume = ctx.pos.volume * self.cfg.addon_lot_factor;
        let step = ctx.info.volume_step;
        if step > 0.0 {
            volume = step * (volume / step).round();
        }
        if ctx.info.volume_min > 0.0 && volume < ctx.info.volume_min {
            return Ok(());
        }
        if ctx.info.volume_max > 0.0 {
            volume = volume.min(ctx.info.volume_max);
        }
        if volume <= 0.0 {
            return Ok(());
        }

        let tag = format!("{}-ADDON", trade.provider_tag);
        let opened = self
            .executor
            .open_runner_trade(
                ctx.account,
                &trade.symbol,
                trade.direction,
                volume,
                sl,
                0.0,
                &tag,
            )
            .await?;

        self.registry
            .incr_addon_count(&ctx.account.name, trade.group_id)
            .await;
        self.registry
            .update(&ctx.account.name, ticket, |t| t.addon_done = true)
            .await;
        self.registry
            .register(ManagedTrade::new(
                &ctx.account.name,
                opened.ticket,
                &trade.symbol,
                trade.direction,
                &tag,
                trade.tps.clone(),
                trade.planned_sl,
                Some(trade.group_id),
            ))
            .await;

        tracing::info!(
            account = %ctx.account.name,
            base = ticket,
            addon = opened.ticket,
            group = trade.group_id,
            level = addon_level,
            volume = volume,
            "addon opened at entry–SL midpoint"
        );
        self.events.emit(TradeEvent::AddonOpened {
            account: ctx.account.name.clone(),
            ticket: opened.ticket,
            base_ticket: ticket,
            group: trade.group_id,
            price: addon_level,
            volume,
        });
        Ok(())
    }
}
