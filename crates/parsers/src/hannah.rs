//! Hannah gold signals.
//!
//! ```text
//! GOLD BUY NOW
//! @4460-4457
//! SL 4454
//! TP1 4463
//! TP2 4466
//! ```

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{ordered_range, ParseResult, SignalParser};

static SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(GOLD|XAUUSD|ORO)\b").unwrap());
static BUY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(BUY|LONG|COMPRA)\b").unwrap());
static SELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(SELL|SHORT|VENDE|VENTA)\b").unwrap());
static ENTRY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@([\d.]+)\s*-\s*([\d.]+)").unwrap());
static SL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)SL\s*:?\s*([\d.]+)").unwrap());
static TP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)TP\d*\s*:?\s*([\d.]+)").unwrap());

pub struct HannahParser;

impl SignalParser for HannahParser {
    fn format_tag(&self) -> &'static str {
        "HANNAH"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();
        if !SYMBOL.is_match(norm) {
            return None;
        }
        let direction = if BUY.is_match(norm) {
            Direction::Buy
        } else if SELL.is_match(norm) {
            Direction::Sell
        } else {
            return None;
        };

        let entry = ENTRY.captures(norm)?;
        let a: f64 = entry.get(1)?.as_str().parse().ok()?;
        let b: f64 = entry.get(2)?.as_str().parse().ok()?;

        let sl = SL
            .captures(norm)
            .and_then(|c| c.get(1)?.as_str().parse().ok());
        let tps: Vec<f64> = TP
            .captures_iter(norm)
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();

        Some(ParseResult {
            format_tag: self.format_tag().to_string(),
            provider_tag: "hannah".to_string(),
            symbol: "XAUUSD".to_string(),
            direction,
            is_fast: false,
            hint_price: None,
            entry_range: Some(ordered_range(a, b)),
            sl,
            tps,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNAL: &str = "GOLD BUY NOW\n@4460-4457\nSL 4454\nTP1 4463\nTP2 4466";

    #[test]
    fn parses_full_signal_with_ordered_range() {
        let r = HannahParser.parse(SIGNAL).unwrap();
        assert_eq!(r.symbol, "XAUUSD");
        assert_eq!(r.direction, Direction::Buy);
        assert_eq!(r.entry_range, Some((4457.0, 4460.0)));
        assert_eq!(r.sl, Some(4454.0));
        assert_eq!(r.tps, vec![4463.0, 4466.0]);
        assert_eq!(r.provider_tag, "hannah");
        assert!(!r.is_fast);
    }

    #[test]
    fn sell_in_spanish() {
        let r = HannahParser
            .parse("ORO VENTA\n@2410-2414\nSL 2420\nTP1 2400")
            .unwrap();
        assert_eq!(r.direction, Direction::Sell);
        assert_eq!(r.entry_range, Some((2410.0, 2414.0)));
    }

    #[test]
    fn missing_range_is_not_a_partial_result() {
        assert!(HannahParser.parse("GOLD BUY NOW\nSL 4454\nTP1 4463").is_none());
    }

    #[test]
    fn missing_direction_rejected() {
        assert!(HannahParser.parse("GOLD @4460-4457 SL 4454").is_none());
    }

    #[test]
    fn reparse_is_idempotent() {
        let first = HannahParser.parse(SIGNAL).unwrap();
        let second = HannahParser.parse(SIGNAL).unwrap();
        assert_eq!(first, second);
    }
}
