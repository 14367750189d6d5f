//! Pip arithmetic shared by the executor and the trade manager.
//!
//! Pip semantics: for symbols whose name begins with `XAU`, one pip is 0.10
//! price units regardless of the broker-reported point; for everything else
//! one pip equals the symbol point.

use crate::Direction;

pub fn is_gold(symbol: &str) -> bool {
    symbol.to_uppercase().starts_with("XAU")
}

/// Size of one pip in price units.
pub fn pip_size(symbol: &str, point: f64) -> f64 {
    if is_gold(symbol) {
        0.1
    } else if point > 0.0 {
        point
    } else {
        0.00001
    }
}

/// Convert a pip distance to a price distance.
pub fn pips_to_price(symbol: &str, pips: f64, point: f64) -> f64 {
    pips * pip_size(symbol, point)
}

/// Signed favourable progress of `current` against `entry`, in pips.
pub fn profit_pips(symbol: &str, direction: Direction, entry: f64, current: f64, point: f64) -> f64 {
    let delta = match direction {
        Direction::Buy => current - entry,
        Direction::Sell => entry - current,
    };
    delta / pip_size(symbol, point)
}

/// Rough monetary value of one pip for a position of `volume` lots.
pub fn pip_value(symbol: &str, volume: f64) -> f64 {
    if is_gold(symbol) {
        1.0 * volume
    } else {
        0.1 * volume
    }
}

/// Default SL price when the signal carried none, at `default_sl_pips`
/// distance on the losing side of `price`.
pub fn default_sl_price(
    symbol: &str,
    direction: Direction,
    price: f64,
    point: f64,
    default_sl_pips: f64,
) -> f64 {
    let offset = pips_to_price(symbol, default_sl_pips, point);
    let sl = match direction {
        Direction::Buy => price - offset,
        Direction::Sell => price + offset,
    };
    round_price(symbol, sl)
}

/// SL price at which the residual position, if stopped out, loses exactly
/// `partial_profit` (the amount realised by the preceding partial close).
pub fn sl_for_locked_loss(
    symbol: &str,
    direction: Direction,
    entry: f64,
    partial_profit: f64,
    residual_volume: f64,
    point: f64,
) -> f64 {
    let per_pip = pip_value(symbol, residual_volume);
    let pips = if per_pip > 0.0 {
        (partial_profit / per_pip).abs()
    } else {
        0.0
    };
    let dist = pips_to_price(symbol, pips, point);
    let sl = match direction {
        Direction::Buy => entry - dist,
        Direction::Sell => entry + dist,
    };
    round_price(symbol, sl)
}

/// Volume to close for a `percent` partial close: floored to `step`,
/// promoted to the whole position when the closable or residual volume
/// would fall below `min_volume`.
pub fn partial_close_volume(current: f64, percent: f64, step: f64, min_volume: f64) -> f64 {
    let raw = current * (percent / 100.0);
    // Epsilon guards against binary-fraction noise flooring a whole step away.
    let mut close = if step > 0.0 {
        step * (raw / step + 1e-9).floor()
    } else {
        raw
    };
    if min_volume > 0.0 && close < min_volume {
        return current;
    }
    if close > current {
        close = current;
    }
    // Never leave an unusable residual behind.
    if min_volume > 0.0 && close < current && (current - close) < min_volume - 1e-12 {
        close = current;
    }
    close
}

fn round_price(symbol: &str, price: f64) -> f64 {
    let digits = if is_gold(symbol) { 2 } else { 5 };
    let factor = 10f64.powi(digits);
    (price * factor).round() / factor
}

// ─── Tests ────────────────────────────────────────────────────────────────────
