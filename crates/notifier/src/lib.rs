//! Outbound Telegram alerts.
//!
//! Strictly best-effort: every send error is logged and swallowed. A slow
//! or offline bot can never stall the trading loops; events reach this
//! crate through the bounded queue drained by the event dispatcher.

use std::collections::HashMap;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{info, warn};

use common::{AccountConfig, TradeEvent};

pub struct TelegramNotifier {
    bot: Bot,
    /// Alert chat per account name.
    chats: HashMap<String, ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: &str, accounts: &[AccountConfig]) -> Self {
        let chats = accounts
            .iter()
            .filter_map(|a| a.chat_id.map(|id| (a.name.clone(), ChatId(id))))
            .collect();
        info!("Telegram notifier ready");
        Self {
            bot: Bot::new(token),
            chats,
        }
    }

    pub async fn notify_event(&self, event: &TradeEvent) {
        let Some(account) = event_account(event) else {
            return;
        };
        let Some(chat) = self.chats.get(account) else {
            return;
        };
        let text = render(event);
        if let Err(e) = self.bot.send_message(*chat, text).await {
            warn!(account = account, error = %e, "alert delivery failed");
        }
    }
}

fn event_account(event: &TradeEvent) -> Option<&str> {
    match event {
        TradeEvent::TradeOpened { account, .. }
        | TradeEvent::TpHit { account, .. }
        | TradeEvent::PartialClosed { account, .. }
        | TradeEvent::BreakEvenSet { account, .. }
        | TradeEvent::BreakEvenFailed { account, .. }
        | TradeEvent::TrailingUpdated { account, .. }
        | TradeEvent::AddonOpened { account, .. }
        | TradeEvent::RunnerOpened { account, .. }
        | TradeEvent::TradeClosed { account, .. } => Some(account),
        TradeEvent::SignalSkipped { .. } | TradeEvent::OpenErrors { .. } => None,
    }
}

/// Human-readable alert text for an event.
pub fn render(event: &TradeEvent) -> String {
    match event {
        TradeEvent::TradeOpened {
            ticket,
            symbol,
            direction,
            provider_tag,
            sl,
            tps,
            ..
        } => format!(
            "📈 Trade opened | Ticket: {ticket} | {symbol} {direction}\nProvider: {provider_tag}\nSL: {sl:.2} | TPs: {tps:?}"
        ),
        TradeEvent::TpHit {
            ticket,
            symbol,
            tp_index,
            tp_price,
            price,
            closed_percent,
            ..
        } => format!(
            "🎯 TP{tp_index} hit | Ticket: {ticket} | {symbol}\nTarget: {tp_price:.2} | Price: {price:.2} | Closing {closed_percent}%"
        ),
        TradeEvent::PartialClosed {
            ticket,
            symbol,
            percent,
            closed_volume,
            reason,
            ..
        } => format!(
            "✂️ Partial close {percent}% | Ticket: {ticket} | {symbol}\nVolume: {closed_volume:.2} | {reason}"
        ),
        TradeEvent::BreakEvenSet { ticket, sl, .. } => {
            format!("✅ Break-even set | Ticket: {ticket} | SL: {sl:.5}")
        }
        TradeEvent::BreakEvenFailed { ticket, reason, .. } => {
            format!("❌ Break-even failed | Ticket: {ticket}\n{reason}")
        }
        TradeEvent::TrailingUpdated { ticket, sl, .. } => {
            format!("🔄 Trailing updated | Ticket: {ticket} | SL: {sl:.5}")
        }
        TradeEvent::AddonOpened {
            ticket,
            base_ticket,
            group,
            volume,
            ..
        } => format!(
            "➕ Addon opened | Ticket: {ticket} | Base: {base_ticket} | Group: {group} | Vol: {volume:.2}"
        ),
        TradeEvent::RunnerOpened {
            ticket,
            symbol,
            volume,
            sl,
            tp,
            ..
        } => format!(
            "🔁 Runner opened | Ticket: {ticket} | {symbol}\nVol: {volume:.2} | SL: {sl:.2} | TP: {tp:.2}"
        ),
        TradeEvent::TradeClosed {
            ticket,
            symbol,
            reason,
            profit,
            ..
        } => match profit {
            Some(p) => format!("🔚 Trade closed | Ticket: {ticket} | {symbol}\n{reason} | PnL: {p:.2}"),
            None => format!("🔚 Trade closed | Ticket: {ticket} | {symbol}\n{reason}"),
        },
        TradeEvent::SignalSkipped { reason, trace } => {
            format!("⏭️ Signal skipped ({reason}) trace={trace}")
        }
        TradeEvent::OpenErrors { trace, errors } => {
            format!("🚨 Open errors trace={trace}: {errors:?}")
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tp_hit_with_levels() {
        let text = render(&TradeEvent::TpHit {
            account: "a".into(),
            ticket: 42,
            symbol: "XAUUSD".into(),
            tp_index: 1,
            tp_price: 4463.0,
            price: 4463.1,
            closed_percent: 33,
        });
        assert!(text.contains("TP1"));
        assert!(text.contains("4463.00"));
        assert!(text.contains("33%"));
    }

    #[test]
    fn account_extraction_skips_global_events() {
        let ev = TradeEvent::SignalSkipped {
            reason: "outside_windows".into(),
            trace: "t".into(),
        };
        assert!(event_account(&ev).is_none());
    }
}
