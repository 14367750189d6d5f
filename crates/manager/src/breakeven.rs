//! Shared break-even routine.
//!
//! Runs after a partial close: wait (bounded) until the terminal reflects
//! the reduced volume, then move the SL to the entry (or an override price)
//! plus the current spread plus the configured offset, on the profitable
//! side. The stop-distance clamp and the post-modification verification
//! happen inside `Mt5Executor::modify_sl`.

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use common::pips::pips_to_price;
use common::{AccountConfig, Direction, Result, TradeEvent};
use executor::types::PositionInfo;

use crate::manager::TradeManager;

const SETTLE_ATTEMPTS: u32 = 8;
const SETTLE_DELAY: Duration = Duration::from_millis(200);

impl TradeManager {
    /// Move the SL of `ticket` to break-even. `override_price` replaces the
    /// position's entry as the anchor (scaling-out uses the tramo-1 close).
    pub(crate) async fn do_be(
        &self,
        account: &AccountConfig,
        ticket: u64,
        override_price: Option<f64>,
    ) -> Result<bool> {
        let client = self.executor.client_for(account).await?;
        let initial_volume = self
            .registry
            .get(&account.name, ticket)
            .await
            .and_then(|t| t.initial_volume);

        // Wait for the preceding partial close to land: volume or
        // time_update must move before the SL anchor is trustworthy.
        let mut observed: Option<PositionInfo> = None;
        let mut baseline: Option<(f64, i64)> = None;
        for attempt in 0..SETTLE_ATTEMPTS {
            let list = client.positions_get(Some(ticket)).await?;
            let Some(pos) = list.into_iter().next() else {
                // Fully closed by the partial; nothing to protect.
                if attempt + 1 == SETTLE_ATTEMPTS {
                    return Ok(false);
                }
                sleep(SETTLE_DELAY).await;
                continue;
            };
            let settled = match (initial_volume, baseline) {
                (Some(init), _) if pos.volume < init - 1e-9 => true,
                (_, Some((v, tu))) => pos.volume != v || pos.time_update != tu,
                _ => {
                    baseline = Some((pos.volume, pos.time_update));
                    false
                }
            };
            observed = Some(pos);
            if settled {
                break;
            }
            sleep(SETTLE_DELAY).await;
        }
        let Some(pos) = observed else {
            self.be_failed(account, ticket, "position not found").await;
            return Ok(false);
        };
        if pos.volume <= 0.0 {
            self.be_failed(account, ticket, "position already closed").await;
            return Ok(false);
        }

        let Some(info) = client.symbol_info(&pos.symbol).await? else {
            self.be_failed(account, ticket, "symbol info unavailable").await;
            return Ok(false);
        };

        let anchor = override_price.unwrap_or(pos.price_open);
        let spread = info.spread_price();
        let offset = pips_to_price(&pos.symbol, self.cfg.be_offset_pips, info.point);
        let be_price = match pos.direction() {
            Direction::Buy => anchor + spread + offset,
            Direction::Sell => anchor - spread - offset,
        };

        let applied = self
            .executor
            .modify_sl(account, ticket, be_price, "BE")
            .await?;
        if applied {
            self.events.emit(TradeEvent::BreakEvenSet {
                account: account.name.clone(),
                ticket,
                sl: be_price,
            });
        } else {
            self.be_failed(account, ticket, "terminal did not confirm the SL")
                .await;
        }
        Ok(applied)
    }

    async fn be_failed(&self, account: &AccountConfig, ticket: u64, reason: &str) {
        warn!(account = %account.name, ticket = ticket, reason = reason, "break-even failed");
        self.events.emit(TradeEvent::BreakEvenFailed {
            account: account.name.clone(),
            ticket,
            reason: reason.to_string(),
        });
    }
}
