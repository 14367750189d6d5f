pub mod daily_signal;
pub mod goldbro_fast;
pub mod goldbro_long;
pub mod goldbro_scalp;
pub mod hannah;
pub mod limitless;
pub mod mgmt;
pub mod torofx;

use std::collections::HashMap;

use common::Direction;
use tracing::debug;

pub use daily_signal::DailySignalParser;
pub use goldbro_fast::GoldbroFastParser;
pub use goldbro_long::GoldbroLongParser;
pub use goldbro_scalp::GoldbroScalpParser;
pub use hannah::HannahParser;
pub use limitless::LimitlessParser;
pub use torofx::ToroFxParser;

/// Standardized output of a provider parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub format_tag: String,
    pub provider_tag: String,
    pub symbol: String,
    pub direction: Direction,
    /// Urgent entry with no SL/TP, refined by a later complete signal.
    pub is_fast: bool,
    pub hint_price: Option<f64>,
    /// Ordered pair, low first.
    pub entry_range: Option<(f64, f64)>,
    pub sl: Option<f64>,
    pub tps: Vec<f64>,
}

/// A format-specific signal parser. `parse` returns `None` both when the
/// text is not this format and when a required field is missing, never a
/// partial result.
pub trait SignalParser: Send + Sync {
    fn format_tag(&self) -> &'static str;
    fn parse(&self, text: &str) -> Option<ParseResult>;
}

/// Collapse symbol aliases onto broker symbols.
pub fn normalize_symbol(raw: &str) -> String {
    let up = raw.trim().to_uppercase().replace('/', "");
    match up.as_str() {
        "GOLD" | "ORO" | "XAU" | "XAUUSD" => "XAUUSD".to_string(),
        _ => up,
    }
}

/// Ordered pair, low first.
pub fn ordered_range(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Fallback trial order when a channel has no configured parser list.
const DEFAULT_ORDER: [&str; 7] = [
    "DAILY_SIGNAL",
    "TOROFX",
    "GB_SCALP",
    "GB_LONG",
    "GB_FAST",
    "HANNAH",
    "LIMITLESS",
];

/// Holds every provider parser and encodes the dispatch priority:
/// "risk price" texts go to Limitless alone, "target: open" texts to ToroFX
/// alone, then Hannah, then the channel's configured list (or all parsers in
/// a fixed order). The first non-null result wins.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn SignalParser>>,
    by_channel: HashMap<i64, Vec<String>>,
}

impl ParserRegistry {
    pub fn new(by_channel: HashMap<i64, Vec<String>>) -> Self {
        let parsers: Vec<Box<dyn SignalParser>> = vec![
            Box::new(DailySignalParser),
            Box::new(ToroFxParser),
            Box::new(GoldbroScalpParser),
            Box::new(GoldbroLongParser),
            Box::new(GoldbroFastParser),
            Box::new(HannahParser),
            Box::new(LimitlessParser),
        ];
        Self { parsers, by_channel }
    }

    fn by_tag(&self, tag: &str) -> Option<&dyn SignalParser> {
        self.parsers
            .iter()
            .find(|p| p.format_tag() == tag)
            .map(|p| p.as_ref())
    }

    pub fn parse(&self, channel: i64, text: &str) -> Option<ParseResult> {
        let norm = text.trim();
        if norm.is_empty() {
            return None;
        }
        let lower = norm.to_lowercase();

        if lower.contains("risk price") {
            return self.try_one("LIMITLESS", norm);
        }
        if lower.contains("target: open") {
            return self.try_one("TOROFX", norm);
        }
        if let Some(result) = self.try_one("HANNAH", norm) {
            return Some(result);
        }

        let order: Vec<&str> = match self.by_channel.get(&channel) {
            Some(tags) if !tags.is_empty() => tags.iter().map(|s| s.as_str()).collect(),
            _ => DEFAULT_ORDER.to_vec(),
        };
        for tag in order {
            if tag == "HANNAH" {
                continue; // already tried
            }
            if let Some(result) = self.try_one(tag, norm) {
                return Some(result);
            }
        }
        debug!(channel = channel, "no parser matched");
        None
    }

    fn try_one(&self, tag: &str, text: &str) -> Option<ParseResult> {
        let parser = self.by_tag(tag)?;
        let result = parser.parse(text);
        if result.is_some() {
            debug!(format = tag, "parser matched");
        }
        result
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ParserRegistry {
        ParserRegistry::new(HashMap::new())
    }

    #[test]
    fn risk_price_routes_to_limitless_exclusively() {
        let text = "GOLD SELL\nZone: 2410-2415\nRisk Price: 2422\nTP1: 2400";
        let r = registry().parse(-1, text).unwrap();
        assert_eq!(r.format_tag, "LIMITLESS");
    }

    #[test]
    fn target_open_routes_to_torofx_exclusively() {
        let text = "Target: Open\nEURUSD BUY\nEntry: 1.2500-1.2510\nSL: 1.2490\nTP: 1.2550";
        let r = registry().parse(-1, text).unwrap();
        assert_eq!(r.format_tag, "TOROFX");
        // Exclusive: a target-open text ToroFX cannot parse is a drop,
        // not a fallback candidate.
        assert!(registry().parse(-1, "Target: Open GOLD BUY MARKET").is_none());
    }

    #[test]
    fn hannah_takes_priority_over_fallback_order() {
        let text = "GOLD BUY NOW\n@4460-4457\nSL 4454\nTP1 4463\nTP2 4466";
        let r = registry().parse(-1, text).unwrap();
        assert_eq!(r.format_tag, "HANNAH");
        assert_eq!(r.provider_tag, "hannah");
    }

    #[test]
    fn channel_scoped_list_restricts_parsers() {
        let mut map = HashMap::new();
        map.insert(-77i64, vec!["TOROFX".to_string()]);
        let reg = ParserRegistry::new(map);
        // A Goldbro long signal on a ToroFX-only channel parses with no one.
        let text = "ORO BUY Entry: 2500-2505, SL: 2490, TP1: 2515";
        assert!(reg.parse(-77, text).is_none());
        // Same text on an unconfigured channel hits the fallback order.
        assert!(registry().parse(-1, text).is_some());
    }

    #[test]
    fn symbol_aliases_collapse_to_broker_names() {
        assert_eq!(normalize_symbol("oro"), "XAUUSD");
        assert_eq!(normalize_symbol("Gold"), "XAUUSD");
        assert_eq!(normalize_symbol("XAU/USD"), "XAUUSD");
        assert_eq!(normalize_symbol("eurusd"), "EURUSD");
    }

    #[test]
    fn noise_parses_with_no_one() {
        assert!(registry().parse(-1, "gm everyone, market looks slow").is_none());
        assert!(registry().parse(-1, "").is_none());
    }
}
