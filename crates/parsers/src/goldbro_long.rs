//! Gold Brothers swing signals: "ORO BUY Entry: 2500-2505, SL: 2490, TP1: 2515".

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{ordered_range, ParseResult, SignalParser};

static SYMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(oro|gold|xau)\b").unwrap());
static BUY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bBUY\b").unwrap());
static SELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELL\b").unwrap());
static ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)entry[\s:]*(\d{3,5}(?:\.\d{1,2})?)\s*[-–]\s*(\d{3,5}(?:\.\d{1,2})?)").unwrap()
});
static SL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sl[\s:]*(\d{3,5}(?:\.\d{1,2})?)").unwrap());
static TP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tp[1-3]?[\s:]*(\d{3,5}(?:\.\d{1,2})?)").unwrap());

pub struct GoldbroLongParser;

impl SignalParser for GoldbroLongParser {
    fn format_tag(&self) -> &'static str {
        "GB_LONG"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();
        if !SYMBOL.is_match(norm) {
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

        Some(ParseResult {
            format_tag: self.format_tag().to_string(),
            provider_tag: "GB_LONG".to_string(),
            symbol: "XAUUSD".to_string(),
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
