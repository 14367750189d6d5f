//! Gold Brothers scalps: single entry price, tight levels, SCALP keyword.
//! "ORO SCALP BUY Entry: 2500, SL: 2495, TP1: 2505 (70%), TP2: 2510"

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{ParseResult, SignalParser};

static SYMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(oro|gold|xau)\b").unwrap());
static SCALP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSCALP\b").unwrap());
static BUY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bBUY\b").unwrap());
static SELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELL\b").unwrap());
static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)entry[\s:]*(\d{3,5}(?:\.\d{1,2})?)").unwrap());
static SL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sl[\s:]*(\d{3,5}(?:\.\d{1,2})?)").unwrap());
static TP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tp[1-3]?[\s:]*(\d{3,5}(?:\.\d{1,2})?)\s*(?:\((\d+)%?\))?").unwrap()
});

pub struct GoldbroScalpParser;

impl SignalParser for GoldbroScalpParser {
    fn format_tag(&self) -> &'static str {
        "GB_SCALP"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();
        if !SYMBOL.is_match(norm) || !SCALP.is_match(norm) {
            return None;
        }
        let is_buy = BUY.is_match(norm);
        let is_sell = SELL.is_match(norm);
        if !is_buy && !is_sell {
            return None;
        }

        let entry: f64 = ENTRY.captures(norm)?.get(1)?.as_str().parse().ok()?;

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

        Some(ParseResult {
            format_tag: self.format_tag().to_string(),
            provider_tag: "GB_SCALP".to_string(),
            symbol: "XAUUSD".to_string(),
            direction: if is_buy { Direction::Buy } else { Direction::Sell },
            is_fast: false,
            hint_price: None,
            // single-price entry
            entry_range: Some((entry, entry)),
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
    fn single_entry_becomes_degenerate_range() {
        let r = GoldbroScalpParser
            .parse("ORO SCALP BUY Entry: 2500, SL: 2495, TP1: 2505 (70%), TP2: 2510 (100%)")
            .unwrap();
        assert_eq!(r.entry_range, Some((2500.0, 2500.0)));
        assert_eq!(r.sl, Some(2495.0));
        assert_eq!(r.tps, vec![2505.0, 2510.0]);
    }

    #[test]
    fn scalp_keyword_required() {
        assert!(GoldbroScalpParser
            .parse("ORO BUY Entry: 2500, SL: 2495")
            .is_none());
    }
}
