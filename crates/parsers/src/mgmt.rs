//! Management-message classifiers.
//!
//! Follow-up chatter must reach the trade manager without going through the
//! signal parsers. Each provider has its own vocabulary; a text that carries
//! formal signal structure (entry plus SL) is never classified as
//! management. ToroFX and Hannah vocabularies are checked before the broad
//! Gold Brothers list because they overlap with it.

use common::ProviderHint;

const TOROFX_KEYWORDS: [&str; 8] = [
    "ASEGURANDO",
    "QUITANDO EL RIESGO",
    "QUITANDO RIESGO",
    "TOMAR PARCIAL",
    "PARCIAL",
    "CERRANDO",
    "CIERRO",
    "CIERRE ENTRADA",
];

const HANNAH_KEYWORDS: [&str; 8] = [
    "CLOSE ALL",
    "CLOSE HALF",
    "HALF GUYS",
    "HALF NOW",
    "HALF ONLY",
    "SECURE",
    "PRICE SPIKED",
    "RISK FREE",
];

const GOLDBRO_KEYWORDS: [&str; 14] = [
    "GANANCIAS",
    "PROFITS",
    "BREAKEVEN",
    "BREAK EVEN",
    "PUNTO DE EQUILIBRIO",
    "CIERRA",
    "CERRAR",
    "RISK OFF",
    "CORRIENDO",
    "PIPS DESDE",
    "RECOGER",
    "SCALPERS",
    "MANTENER",
    "CAPAS",
];

/// True when the text looks like a formal entry signal (entry marker + SL),
/// which disqualifies it from the management path.
fn looks_like_formal_signal(text: &str) -> bool {
    let up = text.to_uppercase();
    let has_entry = up.contains('@') || up.contains("ENTRY") || up.contains("ZONE");
    let has_sl = up.contains("SL") || up.contains("STOP") || up.contains("RISK PRICE");
    has_entry && has_sl
}

fn matches_any(text: &str, keywords: &[&str]) -> bool {
    let up = text.to_uppercase();
    keywords.iter().any(|k| up.contains(k))
}

/// Classify a raw message into a provider management vocabulary, if any.
pub fn classify_management(text: &str) -> Option<ProviderHint> {
    if text.trim().is_empty() || looks_like_formal_signal(text) {
        return None;
    }
    if matches_any(text, &TOROFX_KEYWORDS) {
        return Some(ProviderHint::Torofx);
    }
    if matches_any(text, &HANNAH_KEYWORDS) {
        return Some(ProviderHint::Hannah);
    }
    if matches_any(text, &GOLDBRO_KEYWORDS) {
        return Some(ProviderHint::GoldBrothers);
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────────────────
