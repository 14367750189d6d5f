//! Account trading modes beyond `general`: pip-armed break-even,
//! PnL-anchored break-even, and the TP1 reentry runner.

use common::pips::{profit_pips, sl_for_locked_loss};
use common::{Result, TradeEvent};
use tokio::time::Instant;

use crate::manager::{TickCtx, TradeManager};
use crate::trade::ManagedTrade;

impl TradeManager {
    /// be_pips: once price has run `be_pips` in favour, bank 30% and move
    /// the SL to break-even, then hand over to the general logic.
    pub(crate) async fn manage_be_pips(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        if trade.tps.is_empty() {
            return self.manage_general(ctx, ticket).await;
        }

        let armed_at = ctx.account.be_pips.unwrap_or(self.cfg.default_be_pips);
        let entry = trade.entry_price.unwrap_or(ctx.pos.price_open);
        let progress = profit_pips(&trade.symbol, trade.direction, entry, ctx.current, ctx.info.point);
        if progress >= armed_at && !trade.be_applied {
            self.do_partial_close(ctx.account, ticket, 30, &format!("BE at +{armed_at} pips"))
                .await?;
            self.do_be(ctx.account, ticket, None).await?;
            self.registry
                .update(&ctx.account.name, ticket, |t| t.be_applied = true)
                .await;
        }
        self.manage_general(ctx, ticket).await
    }

    /// be_pnl: same trigger, but the SL lands where a stop-out of the
    /// residual loses exactly what the 30% partial just realised.
    pub(crate) async fn manage_be_pnl(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        if trade.tps.is_empty() {
            return self.manage_general(ctx, ticket).await;
        }

        let armed_at = ctx.account.be_pips.unwrap_or(self.cfg.default_be_pips);
        let entry = trade.entry_price.unwrap_or(ctx.pos.price_open);
        let progress = profit_pips(&trade.symbol, trade.direction, entry, ctx.current, ctx.info.point);
        if progress >= armed_at && !trade.sl_pnl_applied {
            let profit_before = ctx.pos.profit;
            let closed = self
                .do_partial_close(ctx.account, ticket, 30, &format!("PnL lock at +{armed_at} pips"))
                .await?;
            if closed {
                let partial_profit = profit_before * 0.30;
                let client = self.executor.client_for(ctx.account).await?;
                let residual = client
                    .positions_get(Some(ticket))
                    .await?
                    .first()
                    .map(|p| p.volume)
                    .unwrap_or(ctx.pos.volume * 0.70);
                if residual > 0.0 {
                    let sl = sl_for_locked_loss(
                        &trade.symbol,
                        trade.direction,
                        entry,
                        partial_profit,
                        residual,
                        ctx.info.point,
                    );
                    self.executor
                        .modify_sl(ctx.account, ticket, sl, "pnl-lock")
                        .await?;
                }
                self.registry
                    .update(&ctx.account.name, ticket, |t| t.sl_pnl_applied = true)
                    .await;
            }
        }
        self.manage_general(ctx, ticket).await
    }

    /// reentry: TP1 closes the whole trade, then a smaller runner re-enters
    /// in the same direction with SL at the original entry and TP at TP2.
    /// Within 3 s of TP1 the runner always opens; later, an installed
    /// momentum filter may veto it.
    pub(crate) async fn manage_reentry(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        let (Some(&tp1), Some(&tp2)) = (trade.tps.first(), trade.tps.get(1)) else {
            return self.manage_general(ctx, ticket).await;
        };
        if trade.reentry_done {
            return Ok(());
        }

        let is_buy = ctx.is_buy();
        let tp1_reached = if is_buy {
            ctx.current >= tp1
        } else {
            ctx.current <= tp1
        };
        if !tp1_reached {
            return Ok(());
        }

        let original_volume = ctx.pos.volume;
        let entry = ctx.pos.price_open;

        tracing::info!(
            account = %ctx.account.name,
            ticket = ticket,
            tp1 = tp1,
            "reentry: TP1 reached — closing in full"
        );
        self.do_partial_close(ctx.account, ticket, 100, "reentry TP1").await?;
        let tp1_at = Instant::now();
        self.registry
            .update(&ctx.account.name, ticket, |t| {
                t.reentry_tp1_at = Some(tp1_at);
                t.reentry_done = true;
            })
            .await;

        let within_grace = trade
            .reentry_tp1_at
            .unwrap_or(tp1_at)
            .elapsed()
            <= self.cfg.reentry_grace;
        let allowed = within_grace
            || self
                .momentum_filter
                .as_ref()
                .map(|f| f(&trade.symbol))
                .unwrap_or(true);
        if !allowed {
            tracing::info!(
                account = %ctx.account.name,
                ticket = ticket,
                "reentry runner vetoed by momentum filter"
            );
            return Ok(());
        }

        let mut volume = original_volume * self.cfg.reentry_volume_factor;
        let step = ctx.info.volume_step;
        if step > 0.0 {
            volume = step * (volume / step + 1e-9).floor();
        }
        if ctx.info.volume_min > 0.0 {
            volume = volume.max(ctx.info.volume_min);
        }

        let tag = format!("{}_REENTRY", trade.provider_tag);
        let opened = self
            .executor
            .open_runner_trade(ctx.account, &trade.symbol, trade.direction, volume, entry, tp2, &tag)
            .await?;
        self.registry
            .register(ManagedTrade::new(
                &ctx.account.name,
                opened.ticket,
                &trade.symbol,
                trade.direction,
                &tag,
                vec![tp2],
                opened.sl,
                Some(trade.group_id),
            ))
            .await;
        self.events.emit(TradeEvent::RunnerOpened {
            account: ctx.account.name.clone(),
            ticket: opened.ticket,
            symbol: trade.symbol.clone(),
            volume,
            sl: opened.sl,
            tp: tp2,
        });
        Ok(())
    }
}
