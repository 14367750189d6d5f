use std::collections::HashMap;

use parsers::{ParserRegistry, SignalParser};
use proptest::prelude::*;

proptest! {
    /// The registry must never panic on arbitrary chat text, and any result
    /// it produces must satisfy the signal invariants.
    #[test]
    fn registry_never_panics_and_results_are_well_formed(text in "\\PC{0,300}") {
        let registry = ParserRegistry::new(HashMap::new());
        if let Some(r) = registry.parse(-1, &text) {
            prop_assert!(!r.symbol.is_empty());
            if let Some((lo, hi)) = r.entry_range {
                prop_assert!(lo <= hi);
            }
            // Either an entry range or a FAST intent (hint optional).
            prop_assert!(r.entry_range.is_some() || r.is_fast);
        }
    }

    /// Parsing the same text twice yields identical results.
    #[test]
    fn parsing_is_deterministic(text in "\\PC{0,300}") {
        let registry = ParserRegistry::new(HashMap::new());
        prop_assert_eq!(registry.parse(-1, &text), registry.parse(-1, &text));
    }

    /// Mixed-case gold keywords always normalise to XAUUSD.
    #[test]
    fn gold_aliases_normalise(alias in "(?i)(gold|oro|xau)") {
        let text = format!("{alias} BUY NOW\n@4460-4457\nSL 4454\nTP1 4463");
        let r = parsers::HannahParser.parse(&text);
        if let Some(r) = r {
            prop_assert_eq!(r.symbol, "XAUUSD");
        }
    }
}
