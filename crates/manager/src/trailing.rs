//! Trailing stop: activates on pip progress (or an armed runner), then
//! ratchets the SL behind the price. Updates must improve the stop in the
//! favourable direction by at least `trailing_min_change_pips` and respect
//! the cooldown between modifications.

use common::pips::{pips_to_price, profit_pips};
use common::{Result, TradeEvent};
use tokio::time::Instant;

use crate::manager::{TickCtx, TradeManager};

impl TradeManager {
    pub(crate) async fn maybe_trailing(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        let is_buy = ctx.is_buy();
        let point = ctx.info.point;

        let progress = profit_pips(
            &trade.symbol,
            trade.direction,
            ctx.pos.price_open,
            ctx.current,
            point,
        );
        if progress < self.cfg.trailing_activation_pips && !trade.runner_enabled {
            return Ok(());
        }

        if let Some(last) = trade.last_trailing_at {
            if last.elapsed() < self.cfg.trailing_cooldown {
                return Ok(());
            }
        }

        let distance = pips_to_price(&trade.symbol, self.cfg.trailing_stop_pips, point);
        let new_sl = if is_buy {
            ctx.current - distance
        } else {
            ctx.current + distance
        };

        let current_sl = ctx.pos.sl;
        let min_change = pips_to_price(&trade.symbol, self.cfg.trailing_min_change_pips, point);
        if current_sl != 0.0 && (new_sl - current_sl).abs() < min_change {
            return Ok(());
        }
        if let Some(prev) = trade.last_trailing_sl {
            if (new_sl - prev).abs() < min_change {
                return Ok(());
            }
        }
        let improves = current_sl == 0.0
            || (is_buy && new_sl > current_sl)
            || (!is_buy && new_sl < current_sl);
        if !improves {
            return Ok(());
        }

        if self
            .executor
            .modify_sl(ctx.account, ticket, new_sl, "trailing")
            .await?
        {
            self.registry
                .update(&ctx.account.name, ticket, |t| {
                    t.last_trailing_sl = Some(new_sl);
                    t.last_trailing_at = Some(Instant::now());
                })
                .await;
            self.events.emit(TradeEvent::TrailingUpdated {
                account: ctx.account.name.clone(),
                ticket,
                sl: new_sl,
            });
        }
        Ok(())
    }
}
