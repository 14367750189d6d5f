//! Scaling-out for TP-less providers.
//!
//! Every `scaling_tramo_pips` of favourable progress closes a fixed slice.
//! Tramo 1 also moves the SL to break-even; tramo 3 re-anchors the SL at
//! the tramo-1 close price and arms a dedicated trailing that closes the
//! remainder on a `trailing_last_tramo_pips` retrace from the running peak.
//! Each tramo fires at most once per trade.

use common::pips::{pips_to_price, profit_pips};
use common::Result;

use crate::manager::{TickCtx, TradeManager};

const MAX_TRAMOS: u32 = 3;

impl TradeManager {
    pub(crate) async fn maybe_scaling_out(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        if !trade.tps.is_empty() {
            return Ok(());
        }

        let is_buy = ctx.is_buy();
        let point = ctx.info.point;
        let entry = trade.entry_price.unwrap_or(ctx.pos.price_open);
        let gained = profit_pips(&trade.symbol, trade.direction, entry, ctx.current, point);
        // Epsilon keeps an exact multiple from flooring a tramo away.
        let tramo = if gained > 0.0 {
            (gained / self.cfg.scaling_tramo_pips + 1e-9).floor() as u32
        } else {
            0
        };

        for step in 1..=MAX_TRAMOS {
            let action = format!("HIT_TP_SCALING_TRAMO_{step}");
            if tramo < step || trade.actions_done.contains(&action) {
                continue;
            }
            let closed = self
                .do_partial_close(
                    ctx.account,
                    ticket,
                    self.cfg.scaling_percent_per_tramo,
                    &format!("scaling tramo {step}"),
                )
                .await?;
            if !closed {
                break;
            }
            self.registry
                .update(&ctx.account.name, ticket, |t| {
                    t.actions_done.insert(action.clone());
                    if step == 1 {
                        t.first_tramo_close_price = Some(ctx.current);
                    }
                    if step == 3 {
                        t.tramo_trailing_active = true;
                        t.tramo_trailing_peak = Some(ctx.current);
                    }
                })
                .await;
            match step {
                1 => {
                    self.do_be(ctx.account, ticket, None).await?;
                }
                3 => {
                    let anchor = trade.first_tramo_close_price;
                    self.do_be(ctx.account, ticket, anchor).await?;
                }
                _ => {}
            }
            break; // one tramo per tick
        }

        // Retrace guard on the remainder after the last tramo.
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        if !trade.tramo_trailing_active {
            return Ok(());
        }
        let peak = self
            .registry
            .update(&ctx.account.name, ticket, |t| {
                let peak = t.tramo_trailing_peak.get_or_insert(ctx.current);
                if (is_buy && ctx.current > *peak) || (!is_buy && ctx.current < *peak) {
                    *peak = ctx.current;
                }
                *peak
            })
            .await
            .unwrap_or(ctx.current);

        let retrace_needed =
            pips_to_price(&trade.symbol, self.cfg.trailing_last_tramo_pips, point);
        let gave_back = if is_buy { peak - ctx.current } else { ctx.current - peak };
        if gave_back >= retrace_needed {
            tracing::info!(
                account = %ctx.account.name,
                ticket = ticket,
                peak = peak,
                price = ctx.current,
                "scaling trailing retrace — closing remainder"
            );
            self.do_partial_close(ctx.account, ticket, 100, "scaling trailing retrace")
                .await?;
            self.registry
                .update(&ctx.account.name, ticket, |t| t.tramo_trailing_active = false)
                .await;
        }
        Ok(())
    }
}
