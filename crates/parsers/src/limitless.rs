//! Limitless signals, recognisable by their "Risk Price" stop line.
//!
//! ```text
//! GOLD SELL
//! Zone: 2410 - 2415
//! Risk Price: 2422
//! TP1: 2400  TP2: 2390
//! ```

use std::sync::LazyLock;

use common::Direction;
use regex::Regex;

use crate::{normalize_symbol, ordered_range, ParseResult, SignalParser};

static SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([A-Z]{3,6}USD|GOLD|XAUUSD|XAU|ORO)\b").unwrap());
static BUY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bBUY\b").unwrap());
static SELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELL\b").unwrap());
static ZONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Zone[:\s]*([\d.]+)\s*[-–]\s*([\d.]+)").unwrap());
static TP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)TP\s*\d*:?\s*([\d.]+)").unwrap());
static RISK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Risk\s*Price[:\s]*([\d.]+)").unwrap());

pub struct LimitlessParser;

impl SignalParser for LimitlessParser {
    fn format_tag(&self) -> &'static str {
        "LIMITLESS"
    }

    fn parse(&self, text: &str) -> Option<ParseResult> {
        let norm = text.trim();
        let symbol = normalize_symbol(SYMBOL.captures(norm)?.get(1)?.as_str());

        let is_buy = BUY.is_match(norm);
        let is_sell = SELL.is_match(norm);
        if !is_buy && !is_sell {
            return None;
        }
        let direction = if is_buy { Direction::Buy } else { Direction::Sell };

        let zone = ZONE.captures(norm)?;
        let lo: f64 = zone.get(1)?.as_str().parse().ok()?;
        let hi: f64 = zone.get(2)?.as_str().parse().ok()?;

        let sl = RISK
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
            provider_tag: "LIMITLESS".to_string(),
            symbol,
            direction,
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
    fn parses_zone_and_risk_price() {
        let r = LimitlessParser
            .parse("GOLD SELL\nZone: 2415 - 2410\nRisk Price: 2422\nTP1: 2400\nTP2: 2390")
            .unwrap();
        assert_eq!(r.symbol, "XAUUSD");
        assert_eq!(r.direction, Direction::Sell);
        assert_eq!(r.entry_range, Some((2410.0, 2415.0)));
        assert_eq!(r.sl, Some(2422.0));
        assert_eq!(r.tps, vec![2400.0, 2390.0]);
    }

    #[test]
    fn accepts_non_gold_pairs() {
        let r = LimitlessParser
            .parse("BTCUSD BUY Zone: 61000-61200 Risk Price: 60500 TP: 62500")
            .unwrap();
        assert_eq!(r.symbol, "BTCUSD");
        assert_eq!(r.direction, Direction::Buy);
    }

    #[test]
    fn no_zone_no_result() {
        assert!(LimitlessParser
            .parse("GOLD SELL Risk Price: 2422 TP1: 2400")
            .is_none());
    }
}
