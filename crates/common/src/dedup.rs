//! Short-TTL signal deduplication.
//!
//! Two identical signals from the same channel within the TTL collapse to
//! one. The signature covers every field that identifies a trade intent;
//! cleanup is lazy via key expiry.

use sha2::{Digest, Sha256};

use crate::{Bus, Direction, Result};

const KEY_PREFIX: &str = "signal_dedup:";

/// Stable hash over the identifying fields of a parsed signal.
pub fn signature(
    chat_id: i64,
    provider_tag: &str,
    symbol: &str,
    direction: Direction,
    sl: Option<f64>,
    tps: &[f64],
    entry_range: Option<(f64, f64)>,
    hint_price: Option<f64>,
) -> String {
    let mut sorted_tps: Vec<f64> = tps.to_vec();
    sorted_tps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let parts = [
        chat_id.to_string(),
        provider_tag.to_string(),
        symbol.to_string(),
        direction.to_string(),
        sl.map(|v| v.to_string()).unwrap_or_default(),
        format!("{sorted_tps:?}"),
        entry_range
            .map(|(lo, hi)| format!("({lo},{hi})"))
            .unwrap_or_default(),
        hint_price.map(|v| v.to_string()).unwrap_or_default(),
    ];
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct Deduplicator {
    bus: Bus,
    ttl_seconds: u64,
}

impl Deduplicator {
    pub fn new(bus: Bus, ttl_seconds: u64) -> Self {
        Self { bus, ttl_seconds }
    }

    /// Atomically mark `sig` as seen; true when it was already present.
    pub async fn is_duplicate(&self, sig: &str) -> Result<bool> {
        let key = format!("{KEY_PREFIX}{sig}");
        let fresh = self.bus.set_if_absent(&key, self.ttl_seconds).await?;
        Ok(!fresh)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_order_insensitive_in_tps() {
        let a = signature(
            -5250557024,
            "hannah",
            "XAUUSD",
            Direction::Buy,
            Some(4454.0),
            &[4463.0, 4466.0],
            Some((4457.0, 4460.0)),
            None,
        );
        let b = signature(
            -5250557024,
            "hannah",
            "XAUUSD",
            Direction::Buy,
            Some(4454.0),
            &[4466.0, 4463.0],
            Some((4457.0, 4460.0)),
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn signature_differs_per_channel_and_levels() {
        let base = signature(
            -1,
            "hannah",
            "XAUUSD",
            Direction::Buy,
            Some(4454.0),
            &[4463.0],
            Some((4457.0, 4460.0)),
            None,
        );
        let other_chat = signature(
            -2,
            "hannah",
            "XAUUSD",
            Direction::Buy,
            Some(4454.0),
            &[4463.0],
            Some((4457.0, 4460.0)),
            None,
        );
        let other_sl = signature(
            -1,
            "hannah",
            "XAUUSD",
            Direction::Buy,
            Some(4450.0),
            &[4463.0],
            Some((4457.0, 4460.0)),
            None,
        );
        assert_ne!(base, other_chat);
        assert_ne!(base, other_sl);
    }
}
