//! Lot sizing: fixed lot per account, or risk-proportional from balance and
//! SL distance, floored to the symbol volume step and clamped to its limits.

use common::AccountConfig;

use crate::types::SymbolInfo;

pub fn size_lot(
    account: &AccountConfig,
    balance: f64,
    price: f64,
    sl: f64,
    info: &SymbolInfo,
) -> f64 {
    if account.fixed_lot > 0.0 {
        return account.fixed_lot;
    }

    let min_lot = if info.volume_min > 0.0 { info.volume_min } else { 0.01 };
    if account.risk_percent <= 0.0 || sl <= 0.0 {
        return min_lot;
    }

    let sl_distance = (price - sl).abs();
    if sl_distance <= 0.0 || info.tick_value <= 0.0 || info.tick_size <= 0.0 {
        return min_lot;
    }

    let risk_money = balance * (account.risk_percent / 100.0);
    let mut lot = risk_money / (sl_distance * (info.tick_value / info.tick_size));

    if info.volume_step > 0.0 {
        lot = info.volume_step * (lot / info.volume_step + 1e-9).floor();
    }
    if info.volume_max > 0.0 {
        lot = lot.min(info.volume_max);
    }
    lot.max(min_lot)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn gold_info() -> SymbolInfo {
        SymbolInfo {
            point: 0.01,
            digits: 2,
            volume_step: 0.01,
            volume_min: 0.01,
            volume_max: 50.0,
            tick_value: 1.0,
            tick_size: 0.01,
            stops_level: 0.0,
            spread: 0.0,
            trade_fill_mode: 1,
        }
    }

    fn account(fixed: f64, risk: f64) -> AccountConfig {
        serde_json::from_str::<AccountConfig>(&format!(
            r#"{{"name":"t","host":"h","port":1,"fixed_lot":{fixed},"risk_percent":{risk}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn fixed_lot_wins() {
        let lot = size_lot(&account(0.03, 2.0), 10_000.0, 4460.0, 4454.0, &gold_info());
        assert_eq!(lot, 0.03);
    }

    #[test]
    fn risk_sizing_floors_to_step() {
        // risk 1% of 10k = $100; distance 5.0; tick_value/tick_size = 100/unit
        // → raw lot = 100 / (5 * 100) = 0.2
        let lot = size_lot(&account(0.0, 1.0), 10_000.0, 4459.0, 4454.0, &gold_info());
        assert!((lot - 0.2).abs() < 1e-9);
    }

    #[test]
    fn risk_sizing_clamps_to_limits() {
        let mut info = gold_info();
        info.volume_max = 0.1;
        let lot = size_lot(&account(0.0, 50.0), 1_000_000.0, 4459.0, 4454.0, &info);
        assert_eq!(lot, 0.1);
        // Tiny risk collapses to volume_min
        let lot = size_lot(&account(0.0, 0.001), 100.0, 4459.0, 4454.0, &gold_info());
        assert_eq!(lot, 0.01);
    }

    #[test]
    fn missing_sl_falls_back_to_min() {
        let lot = size_lot(&account(0.0, 1.0), 10_000.0, 4459.0, 0.0, &gold_info());
        assert_eq!(lot, 0.01);
    }
}
