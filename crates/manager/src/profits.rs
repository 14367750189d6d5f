//! General-mode management: partial take-profits, break-even after TP1,
//! runner after TP2, retrace close on the maximum favourable excursion.
//!
//! Per TP index the state machine is strictly forward:
//! unmet → closing partial → recorded. A recorded index can never fire
//! again, and the realised close percentage (after volume-step rounding)
//! is what gets recorded and reported.

use common::pips::{partial_close_volume, pips_to_price};
use common::{Result, TradeEvent};

use crate::manager::{TickCtx, TradeManager};

impl TradeManager {
    pub(crate) async fn manage_general(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        self.maybe_take_profits(ctx, ticket).await?;
        if self.cfg.enable_addon {
            self.maybe_addon(ctx, ticket).await?;
        }
        if self.cfg.enable_trailing {
            self.maybe_trailing(ctx, ticket).await?;
        }
        if let Some(trade) = self.registry.get(&ctx.account.name, ticket).await {
            if trade.tps.is_empty() && trade.provider_tag.to_uppercase().contains("TOROFX") {
                self.maybe_scaling_out(ctx, ticket).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn maybe_take_profits(&self, ctx: &TickCtx<'_>, ticket: u64) -> Result<()> {
        let Some(trade) = self.registry.get(&ctx.account.name, ticket).await else {
            return Ok(());
        };
        if trade.tps.is_empty() {
            return Ok(());
        }

        let is_buy = ctx.is_buy();
        let current = ctx.current;

        // Track the maximum favourable excursion for the runner retrace.
        let peak = self
            .registry
            .update(&ctx.account.name, ticket, |t| {
                let better = match t.mfe_peak_price {
                    None => true,
                    Some(p) => (is_buy && current > p) || (!is_buy && current < p),
                };
                if better {
                    t.mfe_peak_price = Some(current);
                }
                t.mfe_peak_price
            })
            .await
            .flatten();

        let buffer_price = pips_to_price(&trade.symbol, self.cfg.buffer_pips, ctx.info.point);
        let long_mode = trade.is_long_mode();
        let schedule = [
            if long_mode { self.cfg.long_tp1_percent } else { self.cfg.scalp_tp1_percent },
            if long_mode { self.cfg.long_tp2_percent } else { self.cfg.scalp_tp2_percent },
        ];

        for (idx, tp) in trade.tps.iter().enumerate() {
            let tp_index = idx + 1;
            if trade.tp_hit.contains(&tp_index) {
                continue;
            }
            if !tp_reached(is_buy, current, *tp, buffer_price) {
                continue;
            }

            let desired = schedule.get(idx).copied().unwrap_or(100);
            let realised = effective_close_percent(
                desired,
                ctx.pos.volume,
                ctx.info.volume_step,
                ctx.info.volume_min,
            );
            tracing::info!(
                account = %ctx.account.name,
                ticket = ticket,
                tp = tp_index,
                target = tp,
                price = current,
                percent = realised,
                "TP reached"
            );
            self.events.emit(TradeEvent::TpHit {
                account: ctx.account.name.clone(),
                ticket,
                symbol: trade.symbol.clone(),
                tp_index,
                tp_price: *tp,
                price: current,
                closed_percent: realised,
            });

            // The close is issued with the schedule's percent; flooring and
            // minimum-volume promotion happen once, in the executor. The
            // realised figure above is what gets recorded and reported.
            self.do_partial_close(ctx.account, ticket, desired, &format!("TP{tp_index}"))
                .await?;
            self.registry
                .update(&ctx.account.name, ticket, |t| {
                    t.tp_hit.insert(tp_index);
                    if tp_index == 2 && t.is_long_mode() {
                        t.runner_enabled = true;
                    }
                })
                .await;

            if tp_index == 1 && self.cfg.enable_be_after_tp1 {
                self.do_be(ctx.account, ticket, None).await?;
            }
            // One TP per tick; the next tick sees the reduced position.
            return Ok(());
        }

        // A long trade past TP2 keeps its runner armed even across restarts.
        if trade.tp_hit.contains(&2) && trade.is_long_mode() && !trade.runner_enabled {
            self.registry
                .update(&ctx.account.name, ticket, |t| t.runner_enabled = true)
                .await;
        }

        // Runner retrace: give back `runner_retrace_pips` from the peak and
        // the remainder is closed.
        let trade = self.registry.get(&ctx.account.name, ticket).await;
        if let (Some(trade), Some(peak)) = (trade, peak) {
            if trade.runner_enabled {
                let retrace = pips_to_price(&trade.symbol, self.cfg.runner_retrace_pips, ctx.info.point);
                let gave_back = if is_buy { peak - current } else { current - peak };
                if gave_back >= retrace {
                    tracing::info!(
                        account = %ctx.account.name,
                        ticket = ticket,
                        peak = peak,
                        price = current,
                        "runner retrace — closing remainder"
                    );
                    self.do_partial_close(ctx.account, ticket, 100, "runner retrace")
                        .await?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn tp_reached(is_buy: bool, current: f64, tp: f64, buffer_price: f64) -> bool {
    if is_buy {
        current >= tp - buffer_price
    } else {
        current <= tp + buffer_price
    }
}

/// The percentage that will actually close once volume-step flooring and
/// minimum-volume promotion are applied.
pub(crate) fn effective_close_percent(desired: u8, volume: f64, step: f64, min_volume: f64) -> u8 {
    if desired >= 100 {
        return 100;
    }
    if volume <= 0.0 || step <= 0.0 || min_volume <= 0.0 {
        return desired;
    }
    let close = partial_close_volume(volume, desired as f64, step, min_volume);
    if close <= 0.0 {
        return 100;
    }
    ((close / volume) * 100.0).round().min(100.0) as u8
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tp_tolerance_window() {
        // 2 gold pips of buffer = 0.2
        assert!(tp_reached(true, 4462.8, 4463.0, 0.2));
        assert!(!tp_reached(true, 4462.7, 4463.0, 0.2));
        assert!(tp_reached(false, 4463.2, 4463.0, 0.2));
        assert!(!tp_reached(false, 4463.3, 4463.0, 0.2));
    }

    #[test]
    fn realised_percent_tracks_flooring() {
        // 50% of 0.03 floors to 0.01 → 33% realised
        assert_eq!(effective_close_percent(50, 0.03, 0.01, 0.01), 33);
        // 50% of 0.04 → 0.02 exactly → 50%
        assert_eq!(effective_close_percent(50, 0.04, 0.01, 0.01), 50);
        // below-minimum close promotes to the full position
        assert_eq!(effective_close_percent(30, 0.02, 0.01, 0.01), 100);
        assert_eq!(effective_close_percent(100, 0.5, 0.01, 0.01), 100);
    }
}
