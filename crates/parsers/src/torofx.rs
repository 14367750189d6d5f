//! ToroFX FX signals ("Target: Open" format) with decimal-quoted pairs.
//!
//! Management phrases ("tomar parcial", "cierro mi entrada") are not entry
//! signals and must fall through to the management path.

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{ordered_range, ParseResult, SignalParser};

static PAIR_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(eur|gbp|usd|nzd|cad|jpy|aud|chf)\w*\b").unwrap());
static BUY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bBUY\b").unwrap());
static SELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELL\b").unwrap());
static ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)entry[\s:]*(\d+\.\d{3,5})\s*[-–]\s*(\d+\.\d{3,5})").unwrap()
});
static SL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)sl[\s:]*(\d+\.\d{3,5})").unwrap());
static TP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)tp[\s:]*(\d+\.\d{3,5})").unwrap());
static SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:EUR|GBP|USD|NZD|CAD|JPY|AUD|CHF){2})\b").unwrap()
});
static PARTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(tomar\s*parcial|take\s*partial|partial\s*profit)\b").unwrap()
});
static CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(cierro|cerrar|cerrando|close)\b").unwrap());

pub struct ToroFxParser;

impl SignalParser for ToroFxParser {
    fn format_tag(&self) -> &'static str {
        "TOROFX"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();

        // Management chatter, not an entry.
        if PARTIAL.is_match(norm) || (CLOSE.is_match(norm) && !BUY.is_match(norm) && !SELL.is_match(norm)) {
            return None;
        }

        if !PAIR_WORD.is_match(norm) {
            return None;
        }
        let is_buy = BUY.is_match(norm);
        let is_sell = SELL.is_match(norm);
        if !is_buy && !is_sell {
            return None;
        }

        let entry = ENTRY.captures(norm)?;
        let lo: f64 = entry.get(1)?.as_str().parse().ok()?;
        let hi: f64 = entry.get(2)?.as_str().parse().ok()?;

        let sl = SL
            .captures(norm)
            .and_then(|c| c.get(1)?.as_str().parse().ok());
        let mut tps: Vec<f64> = Vec::new();
        for cap in TP.captures_iter(norm) {
            if let Some(tp) = cap.get(1).and_then(|m| m.as_str().parse().ok()) {
                if !tps.contains(&tp) {
                    tps.push(tp);
                }
            }
        }

        let symbol = SYMBOL
            .captures(&norm.to_uppercase())
            .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
            .unwrap_or_else(|| "EURUSD".to_string());

        Some(ParseResult {
            format_tag: self.format_tag().to_string(),
            provider_tag: "TOROFX".to_string(),
            symbol,
            direction: if is_buy { Direction::Buy } else { Direction::Sell },
            is_fast: false,
            hint_price: None,
            entry_range: Some(ordered_range(lo, hi)),
            sl,
            tps,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fx_pair_signal() {
        let r = ToroFxParser
            .parse("Target: Open\nEURUSD BUY\nEntry: 1.2500-1.2510\nSL: 1.2490\nTP: 1.2550")
            .unwrap();
        assert_eq!(r.symbol, "EURUSD");
        assert_eq!(r.direction, Direction::Buy);
        assert_eq!(r.entry_range, Some((1.25, 1.251)));
        assert_eq!(r.sl, Some(1.249));
        assert_eq!(r.tps, vec![1.255]);
    }

    #[test]
    fn management_phrases_are_not_signals() {
        assert!(ToroFxParser.parse("Tomar parcial aquí +30").is_none());
        assert!(ToroFxParser.parse("Cierro mi entrada de 1.2500").is_none());
    }

    #[test]
    fn integer_quotes_do_not_match() {
        assert!(ToroFxParser
            .parse("EURUSD BUY Entry: 12500-12510 SL: 12490")
            .is_none());
    }
}
