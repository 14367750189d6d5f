//! Raw-message router.
//!
//! Consumes `raw_messages` in a consumer group and turns each chat message
//! into exactly one of: a management forward, a parsed signal, or a drop.
//! FAST signals leave a short-TTL marker; a complete signal that finds an
//! unexpired marker is flagged as an upgrade and bypasses deduplication
//! (the position already exists and only needs retargeting). Everything
//! consumed is acknowledged after publication, matched or not.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use common::bus::streams;
use common::{dedup, Bus, Deduplicator, MgmtMessage, ParsedSignal, RawMessage, Result, StreamMessage};
use parsers::{mgmt::classify_management, ParseResult, ParserRegistry};

const GROUP: &str = "router";
const READ_COUNT: usize = 50;
const BLOCK_MS: usize = 200;

pub struct Router {
    bus: Bus,
    dedup: Deduplicator,
    registry: ParserRegistry,
    fast_window_seconds: u64,
    consumer: String,
}

impl Router {
    pub fn new(
        bus: Bus,
        dedup_ttl_seconds: u64,
        fast_window_seconds: u64,
        channel_parsers: HashMap<i64, Vec<String>>,
    ) -> Self {
        let dedup = Deduplicator::new(bus.clone(), dedup_ttl_seconds);
        Self {
            bus,
            dedup,
            registry: ParserRegistry::new(channel_parsers),
            fast_window_seconds,
            consumer: format!("router-{}", std::process::id()),
        }
    }

    /// Consume raw messages forever. Call from `tokio::spawn`.
    pub async fn run(self) {
        if let Err(e) = self.bus.ensure_group(streams::RAW, GROUP).await {
            warn!(error = %e, "could not create router consumer group");
        }
        info!("Router consuming {}", streams::RAW);
        loop {
            let batch = match self
                .bus
                .read_group(streams::RAW, GROUP, &self.consumer, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "raw stream read failed — retrying");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            for msg in batch {
                if let Err(e) = self.process(&msg).await {
                    warn!(id = %msg.id, error = %e, "raw message processing failed");
                }
                // Ack unconditionally: a message that produced nothing is
                // a drop, not a redelivery candidate.
                if let Err(e) = self.bus.ack(streams::RAW, GROUP, &msg.id).await {
                    warn!(id = %msg.id, error = %e, "ack failed");
                }
            }
        }
    }

    async fn process(&self, msg: &StreamMessage) -> Result<()> {
        let raw = RawMessage::from_fields(&msg.fields);
        if raw.text.trim().is_empty() {
            return Ok(());
        }

        if let Some(hint) = classify_management(&raw.text) {
            let mgmt = MgmtMessage {
                chat_id: raw.chat_id,
                text: raw.text.clone(),
                provider_hint: Some(hint),
            };
            self.bus.publish(streams::MGMT, &mgmt.to_fields()).await?;
            info!(chat = raw.chat_id, provider = hint.as_str(), "management follow-up routed");
            return Ok(());
        }

        let Some(parsed) = self.registry.parse(raw.chat_id, &raw.text) else {
            debug!(chat = raw.chat_id, "dropped: no parser matched");
            return Ok(());
        };

        let fast_key = fast_record_key(raw.chat_id, &parsed.symbol, &parsed.direction.to_string());
        let mut upgrade = false;
        if parsed.is_fast {
            self.bus
                .set_ex(&fast_key, "1", self.fast_window_seconds)
                .await?;
        } else if self.bus.key_exists(&fast_key).await? {
            // The refinement the FAST entry was waiting for.
            upgrade = true;
        }

        if !upgrade {
            let sig = dedup::signature(
                raw.chat_id,
                &parsed.provider_tag,
                &parsed.symbol,
                parsed.direction,
                parsed.sl,
                &parsed.tps,
                parsed.entry_range,
                parsed.hint_price,
            );
            if self.dedup.is_duplicate(&sig).await? {
                info!(chat = raw.chat_id, provider = %parsed.provider_tag, "duplicate signal suppressed");
                return Ok(());
            }
        }

        let signal = build_signal(&raw, parsed, upgrade);
        self.bus.publish(streams::SIGNALS, &signal.to_fields()).await?;
        info!(
            trace = %signal.trace,
            chat = raw.chat_id,
            provider = %signal.provider_tag,
            symbol = %signal.symbol,
            direction = %signal.direction,
            fast = signal.fast,
            upgrade = signal.upgrade,
            "signal published"
        );
        Ok(())
    }
}

pub fn fast_record_key(chat_id: i64, symbol: &str, direction: &str) -> String {
    format!("fast_sig:{chat_id}:{symbol}:{direction}")
}

/// Canonical wire signal from a parse result, stamped with a fresh trace id.
pub fn build_signal(raw: &RawMessage, parsed: ParseResult, upgrade: bool) -> ParsedSignal {
    ParsedSignal {
        symbol: parsed.symbol,
        direction: parsed.direction,
        entry_range: parsed.entry_range,
        sl: parsed.sl,
        tps: parsed.tps,
        provider_tag: parsed.provider_tag,
        format_tag: parsed.format_tag,
        fast: parsed.is_fast,
        hint_price: parsed.hint_price,
        chat_id: raw.chat_id,
        raw_text: raw.text.clone(),
        trace: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        upgrade,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use common::Direction;

    fn raw(text: &str) -> RawMessage {
        RawMessage {
            chat_id: -5250557024,
            message_id: "1".into(),
            date: "2025-01-01T00:00:00Z".into(),
            text: text.into(),
        }
    }

    #[test]
    fn build_signal_carries_source_and_trace() {
        let registry = ParserRegistry::new(HashMap::new());
        let text = "GOLD BUY NOW\n@4460-4457\nSL 4454\nTP1 4463\nTP2 4466";
        let parsed = registry.parse(-5250557024, text).unwrap();
        let sig = build_signal(&raw(text), parsed, false);

        assert_eq!(sig.symbol, "XAUUSD");
        assert_eq!(sig.direction, Direction::Buy);
        assert_eq!(sig.entry_range, Some((4457.0, 4460.0)));
        assert_eq!(sig.sl, Some(4454.0));
        assert_eq!(sig.tps, vec![4463.0, 4466.0]);
        assert_eq!(sig.provider_tag, "hannah");
        assert_eq!(sig.chat_id, -5250557024);
        assert_eq!(sig.raw_text, text);
        assert_eq!(sig.trace.len(), 8);
        assert!(!sig.upgrade);
    }

    #[test]
    fn fast_key_is_channel_scoped() {
        assert_eq!(
            fast_record_key(-42, "XAUUSD", "BUY"),
            "fast_sig:-42:XAUUSD:BUY"
        );
        assert_ne!(
            fast_record_key(-42, "XAUUSD", "BUY"),
            fast_record_key(-43, "XAUUSD", "BUY")
        );
    }

    #[test]
    fn identical_signals_share_a_dedup_signature() {
        let registry = ParserRegistry::new(HashMap::new());
        let text = "GOLD BUY NOW\n@4460-4457\nSL 4454\nTP1 4463\nTP2 4466";
        let a = registry.parse(-1, text).unwrap();
        let b = registry.parse(-1, text).unwrap();
        let sig = |p: &ParseResult| {
            dedup::signature(
                -1,
                &p.provider_tag,
                &p.symbol,
                p.direction,
                p.sl,
                &p.tps,
                p.entry_range,
                p.hint_price,
            )
        };
        assert_eq!(sig(&a), sig(&b));
    }
}
