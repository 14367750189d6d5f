mod orchestrator;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use common::timewindow::parse_windows;
use common::{Bus, EventSink, Settings};
use executor::{ExecutorConfig, HttpConnector, Mt5Executor};
use manager::{ManagerConfig, TradeManager, TradeRegistry};
use notifier::TelegramNotifier;
use router::Router;

use orchestrator::{events_loop, watchdog_loop, Orchestrator};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let settings = Settings::from_env();
    let accounts = settings
        .accounts()
        .unwrap_or_else(|e| panic!("Invalid ACCOUNTS_JSON: {e}"));
    let channels = settings
        .channel_parsers()
        .unwrap_or_else(|e| panic!("Invalid CHANNELS_CONFIG_JSON: {e}"));
    let windows = parse_windows(&settings.trading_windows)
        .unwrap_or_else(|e| panic!("Invalid TRADING_WINDOWS: {e}"));
    info!(
        accounts = accounts.len(),
        windows = windows.len(),
        "MirrorBot starting"
    );

    // ── Bus ───────────────────────────────────────────────────────────────────
    let bus = Bus::connect(&settings.redis_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to Redis: {e}"));

    // ── Executor ──────────────────────────────────────────────────────────────
    let exec_cfg = ExecutorConfig {
        windows: windows.clone(),
        entry_wait_seconds: settings.entry_wait_seconds,
        entry_poll_ms: settings.entry_poll_ms,
        entry_buffer_points: settings.entry_buffer_points,
        default_sl_xauusd_pips: settings.default_sl_xauusd_pips,
        default_sl_pips: settings.default_sl_pips,
        ..ExecutorConfig::default()
    };
    let executor = Arc::new(Mt5Executor::new(
        accounts.clone(),
        Arc::new(HttpConnector),
        exec_cfg,
    ));

    // ── Trade manager ─────────────────────────────────────────────────────────
    let (events, events_rx) = EventSink::channel();
    let manager = Arc::new(
        TradeManager::new(
            executor.clone(),
            TradeRegistry::new(),
            ManagerConfig::from_settings(&settings),
            events.clone(),
        )
        .with_bus(bus.clone()),
    );

    // ── Router ────────────────────────────────────────────────────────────────
    let signal_router = Router::new(
        bus.clone(),
        settings.dedup_ttl_seconds,
        settings.fast_update_window_seconds,
        channels,
    );

    // ── Notifier (optional) ───────────────────────────────────────────────────
    let telegram = settings
        .telegram_token
        .as_deref()
        .map(|token| Arc::new(TelegramNotifier::new(token, &accounts)));

    // ── Orchestrator ──────────────────────────────────────────────────────────
    let orch = Arc::new(Orchestrator::new(
        bus.clone(),
        settings,
        windows,
        executor.clone(),
        manager.clone(),
        events,
    ));

    // ── Spawn all loops ───────────────────────────────────────────────────────
    tokio::spawn(signal_router.run());
    tokio::spawn(orch.clone().signals_loop());
    tokio::spawn(orch.clone().commands_loop());
    tokio::spawn(orch.clone().mgmt_loop());
    tokio::spawn(manager.run());
    tokio::spawn(events_loop(bus, events_rx, telegram));
    tokio::spawn(watchdog_loop(executor));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}
