//! Gold Brothers urgent entries: "Compra ORO ahora @2500".
//!
//! A FAST result carries no SL or TPs; the command translator derives a
//! temporary SL from the live price and the trade is retargeted when the
//! complete signal arrives.

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{ParseResult, SignalParser};

static SYMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(oro|gold|xau)\b").unwrap());
static BUY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(compra|comprar|compren|buy|long|entrada)\b").unwrap());
static SELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(vende|vender|vendan|venta|sell|short|salida)\b").unwrap());
static URGENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ahora|now|ya|inmediato|asap|de\s+nuevo|nuevamente)\b").unwrap()
});
static PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{3,5}(?:\.\d{1,2})?)\b").unwrap());
// Texts carrying SL/TP structure are complete signals, never FAST.
static COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(entry|sl|stop\s*loss|tp1|tp2|tp3|take\s*profit|target|rango)\b").unwrap()
});

/// Plausible gold quote band for the optional hint price.
const HINT_MIN: f64 = 500.0;
const HINT_MAX: f64 = 20_000.0;

pub struct GoldbroFastParser;

impl SignalParser for GoldbroFastParser {
    fn format_tag(&self) -> &'static str {
        "GB_FAST"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();

        if norm.to_lowercase().contains("risk price") {
            return None;
        }
        if COMPLETE.is_match(norm) {
            return None;
        }
        if !SYMBOL.is_match(norm) {
            return None;
        }

        let is_buy = BUY.is_match(norm);
        let is_sell = SELL.is_match(norm);
        if !is_buy && !is_sell {
            return None;
        }
        if !URGENCY.is_match(norm) {
            return None;
        }

        let hint = PRICE
            .captures(norm)
            .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .filter(|v| (HINT_MIN..=HINT_MAX).contains(v));

        Some(ParseResult {
            format_tag: self.format_tag().to_string(),
            provider_tag: "GB_FAST".to_string(),
            symbol: "XAUUSD".to_string(),
            direction: if is_buy { Direction::Buy } else { Direction::Sell },
            is_fast: true,
            hint_price: hint,
            entry_range: None,
            sl: None,
            tps: Vec::new(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgent_spanish_buy_with_hint() {
        let r = GoldbroFastParser.parse("Compra ORO ahora @2500").unwrap();
        assert_eq!(r.direction, Direction::Buy);
        assert!(r.is_fast);
        assert_eq!(r.hint_price, Some(2500.0));
        assert!(r.sl.is_none());
        assert!(r.tps.is_empty());
    }

    #[test]
    fn urgency_required() {
        assert!(GoldbroFastParser.parse("Compra ORO en la zona").is_none());
    }

    #[test]
    fn complete_signals_are_rejected() {
        assert!(GoldbroFastParser
            .parse("ORO BUY now Entry: 2500-2505, SL: 2490, TP1: 2515")
            .is_none());
    }

    #[test]
    fn sell_now_without_hint() {
        let r = GoldbroFastParser.parse("GOLD sell now!!").unwrap();
        assert_eq!(r.direction, Direction::Sell);
        assert_eq!(r.hint_price, None);
    }
}
