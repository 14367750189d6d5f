use std::collections::HashMap;

use crate::{AccountConfig, Error, Result};

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Settings {
    // Bus / stores
    pub redis_url: String,
    pub dedup_ttl_seconds: u64,
    pub fast_update_window_seconds: u64,

    // Trading windows (New York time)
    pub trading_windows: String,

    // Entry gating
    pub entry_wait_seconds: u64,
    pub entry_poll_ms: u64,
    pub entry_buffer_points: f64,

    // SL fallback
    pub default_sl_xauusd_pips: f64,
    pub default_sl_pips: f64,

    // Partial take-profit schedule
    pub scalp_tp1_percent: u8,
    pub scalp_tp2_percent: u8,
    pub long_tp1_percent: u8,
    pub long_tp2_percent: u8,

    // Break-even
    pub enable_breakeven: bool,
    pub breakeven_offset_pips: f64,

    // Trailing
    pub enable_trailing: bool,
    pub trailing_activation_pips: f64,
    pub trailing_stop_pips: f64,
    pub trailing_min_change_pips: f64,
    pub trailing_cooldown_sec: f64,

    // Runner
    pub runner_retrace_pips: f64,
    pub buffer_pips: f64,

    // Addon entries
    pub enable_addon: bool,
    pub addon_max_count: u32,
    pub addon_lot_factor: f64,
    pub addon_min_seconds_from_open: u64,
    pub addon_entry_sl_ratio: f64,

    // Scaling-out for TP-less providers
    pub scaling_tramo_pips: f64,
    pub scaling_percent_per_tramo: u8,
    pub trailing_last_tramo_pips: f64,

    // ToroFX management defaults
    pub torofx_partial_default_percent: u8,
    pub torofx_partial_min_pips: f64,
    pub torofx_close_entry_tolerance_pips: f64,

    // Manager loop
    pub loop_sleep_sec: f64,

    // Notifier (optional; alerts disabled when unset)
    pub telegram_token: Option<String>,

    // JSON blobs
    pub accounts_json: String,
    pub channels_config_json: String,
}

impl Settings {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Settings {
            redis_url: optional_env("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string()),
            dedup_ttl_seconds: env_parse("DEDUP_TTL_SECONDS", 120),
            fast_update_window_seconds: env_parse("FAST_UPDATE_WINDOW_SECONDS", 30),
            trading_windows: optional_env("TRADING_WINDOWS")
                .unwrap_or_else(|| "03:00-12:00,08:00-17:00".to_string()),
            entry_wait_seconds: env_parse("ENTRY_WAIT_SECONDS", 60),
            entry_poll_ms: env_parse("ENTRY_POLL_MS", 500),
            entry_buffer_points: env_parse("ENTRY_BUFFER_POINTS", 0.0),
            default_sl_xauusd_pips: env_parse("DEFAULT_SL_XAUUSD_PIPS", 300.0),
            default_sl_pips: env_parse("DEFAULT_SL_PIPS", 100.0),
            scalp_tp1_percent: env_parse("SCALP_TP1_PERCENT", 50),
            scalp_tp2_percent: env_parse("SCALP_TP2_PERCENT", 80),
            long_tp1_percent: env_parse("LONG_TP1_PERCENT", 50),
            long_tp2_percent: env_parse("LONG_TP2_PERCENT", 80),
            enable_breakeven: env_parse("ENABLE_BREAKEVEN", true),
            breakeven_offset_pips: env_parse("BREAKEVEN_OFFSET_PIPS", 0.0),
            enable_trailing: env_parse("ENABLE_TRAILING", true),
            trailing_activation_pips: env_parse("TRAILING_ACTIVATION_PIPS", 30.0),
            trailing_stop_pips: env_parse("TRAILING_STOP_PIPS", 20.0),
            trailing_min_change_pips: env_parse("TRAILING_MIN_CHANGE_PIPS", 1.0),
            trailing_cooldown_sec: env_parse("TRAILING_COOLDOWN_SEC", 2.0),
            runner_retrace_pips: env_parse("RUNNER_RETRACE_PIPS", 20.0),
            buffer_pips: env_parse("BUFFER_PIPS", 2.0),
            enable_addon: env_parse("ENABLE_ADDON", true),
            addon_max_count: env_parse("ADDON_MAX_COUNT", 1),
            addon_lot_factor: env_parse("ADDON_LOT_FACTOR", 0.5),
            addon_min_seconds_from_open: env_parse("ADDON_MIN_SECONDS_FROM_OPEN", 5),
            addon_entry_sl_ratio: env_parse("ADDON_ENTRY_SL_RATIO", 0.5),
            scaling_tramo_pips: env_parse("SCALING_TRAMO_PIPS", 40.0),
            scaling_percent_per_tramo: env_parse("SCALING_PERCENT_PER_TRAMO", 25),
            trailing_last_tramo_pips: env_parse("TRAILING_LAST_TRAMO_PIPS", 40.0),
            torofx_partial_default_percent: env_parse("TOROFX_PARTIAL_DEFAULT_PERCENT", 30),
            torofx_partial_min_pips: env_parse("TOROFX_PARTIAL_MIN_PIPS", 30.0),
            torofx_close_entry_tolerance_pips: env_parse("TOROFX_CLOSE_ENTRY_TOLERANCE_PIPS", 10.0),
            loop_sleep_sec: env_parse("LOOP_SLEEP_SEC", 1.0),
            telegram_token: optional_env("TELEGRAM_TOKEN"),
            accounts_json: optional_env("ACCOUNTS_JSON").unwrap_or_else(|| "[]".to_string()),
            channels_config_json: optional_env("CHANNELS_CONFIG_JSON")
                .unwrap_or_else(|| "{}".to_string()),
        }
    }

    /// Broker accounts from `ACCOUNTS_JSON`.
    pub fn accounts(&self) -> Result<Vec<AccountConfig>> {
        serde_json::from_str(&self.accounts_json)
            .map_err(|e| Error::Config(format!("ACCOUNTS_JSON: {e}")))
    }

    /// Per-channel parser lists from `CHANNELS_CONFIG_JSON`
    /// (chat id → ordered list of parser format tags).
    pub fn channel_parsers(&self) -> Result<HashMap<i64, Vec<String>>> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(&self.channels_config_json)
            .map_err(|e| Error::Config(format!("CHANNELS_CONFIG_JSON: {e}")))?;
        let mut out = HashMap::new();
        for (k, v) in raw {
            let id: i64 = k
                .parse()
                .map_err(|_| Error::Config(format!("CHANNELS_CONFIG_JSON: bad chat id '{k}'")))?;
            out.insert(id, v);
        }
        Ok(out)
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    optional_env(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TradingMode;

    #[test]
    fn accounts_json_parses_with_defaults() {
        let mut s = Settings::from_env();
        s.accounts_json = r#"[
            {"name":"alpha","host":"10.0.0.5","port":18812,"fixed_lot":0.03,
             "allowed_channels":[-5250557024],"trading_mode":"reentry","be_pips":25.0},
            {"name":"beta","host":"10.0.0.6","port":18812,"risk_percent":1.0}
        ]"#
        .to_string();
        let accounts = s.accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].trading_mode, TradingMode::Reentry);
        assert!(accounts[0].active);
        assert_eq!(accounts[1].trading_mode, TradingMode::General);
        assert_eq!(accounts[1].fixed_lot, 0.0);
    }

    #[test]
    fn channel_parsers_keyed_by_chat_id() {
        let mut s = Settings::from_env();
        s.channels_config_json = r#"{"-5250557024":["HANNAH"],"-100":["TOROFX","GB_LONG"]}"#.into();
        let map = s.channel_parsers().unwrap();
        assert_eq!(map[&-5250557024], vec!["HANNAH".to_string()]);
        assert_eq!(map[&-100].len(), 2);
    }
}
