//! Daily "MARKET" signals, multi-symbol:
//! "BUY MARKET XAUUSD Entry: 2500-2505, SL: 2490, TP1: 2515, TP2: 2530"

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{normalize_symbol, ordered_range, ParseResult, SignalParser};

static MARKET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(MARKET|AHORA)\b").unwrap());
static BUY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(BUY|COMPRA)\b").unwrap());
static SELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(SELL|VENTA)\b").unwrap());
static SYMBOL_AFTER_MARKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:BUY|SELL|COMPRA|VENTA)\s+MARKET\s+([A-Z]{3,10})").unwrap());
static ENTRY_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)entry(?:\s*price)?[\s:]*(\d{3,5}(?:\.\d{1,2})?)\s*[-–]\s*(\d{3,5}(?:\.\d{1,2})?)")
        .unwrap()
});
static AT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@?(\d{3,5}(?:\.\d{1,2})?)\s*[-–]\s*(\d{3,5}(?:\.\d{1,2})?)").unwrap()
});
static SINGLE_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)entry(?:\s*price)?[\s:\-]*@?(\d{3,5}(?:\.\d{1,2})?)").unwrap()
});
static SL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sl[\s:]*(\d{3,5}(?:\.\d{1,2})?)").unwrap());
static TP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tp[1-3]?[\s:]*(\d{3,5}(?:\.\d{1,2})?)").unwrap());

pub struct DailySignalParser;

impl SignalParser for DailySignalParser {
    fn format_tag(&self) -> &'static str {
        "DAILY_SIGNAL"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();
        if !MARKET.is_match(norm) {
            return None;
        }
        let is_buy = BUY.is_match(norm);
        let is_sell = SELL.is_match(norm);
        if !is_buy && !is_sell {
            return None;
        }

        let symbol = SYMBOL_AFTER_MARKET
            .captures(norm)
            .and_then(|c| c.get(1).map(|m| normalize_symbol(m.as_str())))
            // The word after MARKET may be prose, not a ticker.
            .filter(|s| !matches!(s.as_str(), "ENTRY" | "PRICE" | "NOW" | "AHORA" | "SL" | "TP"))?;

        let entry_range = ENTRY_RANGE
            .captures(norm)
            .or_else(|| AT_RANGE.captures(norm))
            .and_then(|c| {
                let a: f64 = c.get(1)?.as_str().parse().ok()?;
                let b: f64 = c.get(2)?.as_str().parse().ok()?;
                Some(ordered_range(a, b))
            })
            .or_else(|| {
                let v: f64 = SINGLE_ENTRY.captures(norm)?.get(1)?.as_str().parse().ok()?;
                Some((v, v))
            })?;

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
            provider_tag: "DAILY_SIGNAL".to_string(),
            symbol,
            direction: if is_buy { Direction::Buy } else { Direction::Sell },
            is_fast: false,
            hint_price: None,
            entry_range: Some(entry_range),
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
    fn parses_market_signal_with_range() {
        let r = DailySignalParser
            .parse("BUY MARKET XAUUSD Entry: 2500-2505, SL: 2490, TP1: 2515, TP2: 2530, TP3: 2550")
            .unwrap();
        assert_eq!(r.symbol, "XAUUSD");
        assert_eq!(r.direction, Direction::Buy);
        assert_eq!(r.entry_range, Some((2500.0, 2505.0)));
        assert_eq!(r.tps.len(), 3);
    }

    #[test]
    fn single_entry_fallback() {
        let r = DailySignalParser
            .parse("SELL MARKET GOLD Entry @4471 SL 4480 TP1 4460")
            .unwrap();
        assert_eq!(r.symbol, "XAUUSD");
        assert_eq!(r.entry_range, Some((4471.0, 4471.0)));
    }

    #[test]
    fn market_keyword_required() {
        assert!(DailySignalParser
            .parse("BUY XAUUSD Entry: 2500-2505 SL: 2490")
            .is_none());
    }

    #[test]
    fn symbol_required() {
        assert!(DailySignalParser.parse("BUY MARKET Entry: 2500-2505").is_none());
    }
}
