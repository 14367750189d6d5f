use std::sync::Arc;
use std::time::Duration;

use common::{AccountConfig, Direction, EventSink, ParsedSignal, TradeEvent};
use executor::bridge::NullConnector;
use executor::types::ACTION_SLTP;
use executor::{ExecutorConfig, Mt5Bridge, Mt5Executor};
use manager::{ManagedTrade, ManagerConfig, TradeManager, TradeRegistry};
use sim::{gold_info, open_market, SimBridge};
use tokio::sync::mpsc;

struct Harness {
    account: AccountConfig,
    sim: Arc<SimBridge>,
    mgr: Arc<TradeManager>,
    #[allow(dead_code)] // kept to prevent the event queue from closing
    events_rx: mpsc::Receiver<TradeEvent>,
}

fn quiet_cfg() -> ManagerConfig {
    // Trailing/addon off by default so each scenario isolates one behaviour.
    ManagerConfig {
        enable_trailing: false,
        enable_addon: false,
        ..ManagerConfig::default()
    }
}

async fn harness(account_json: &str, cfg: ManagerConfig) -> Harness {
    let account: AccountConfig = serde_json::from_str(account_json).unwrap();
    let exec = Arc::new(Mt5Executor::new(
        vec![account.clone()],
        Arc::new(NullConnector),
        ExecutorConfig::default(),
    ));
    let sim = SimBridge::new(10_000.0);
    sim.add_symbol("XAUUSD", gold_info()).await;
    sim.set_tick("XAUUSD", 4459.8, 4460.0).await;
    exec.install_client(&account.name, sim.clone()).await;

    let (events, events_rx) = EventSink::channel();
    let mgr = Arc::new(TradeManager::new(exec, TradeRegistry::new(), cfg, events));
    Harness {
        account,
        sim,
        mgr,
        events_rx,
    }
}

const GENERAL: &str = r#"{"name":"a","host":"h","port":1,"fixed_lot":0.03}"#;

async fn open_and_register(
    h: &Harness,
    volume: f64,
    sl: f64,
    tps: Vec<f64>,
    provider: &str,
) -> u64 {
    let ticket = open_market(&h.sim, "XAUUSD", Direction::Buy, volume, sl, 624011).await;
    h.mgr
        .registry()
        .register(ManagedTrade::new(
            &h.account.name,
            ticket,
            "XAUUSD",
            Direction::Buy,
            provider,
            tps,
            sl,
            None,
        ))
        .await;
    // First tick records entry price and initial volume.
    h.mgr.tick_account(&h.account).await.unwrap();
    ticket
}

// ─── General mode ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn tp1_partial_close_then_breakeven() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let ticket = open_and_register(&h, 0.03, 4454.0, vec![4463.0, 4466.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4463.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();

    let pos = h.sim.positions().await;
    assert_eq!(pos.len(), 1);
    // 50% of 0.03 floors to one 0.01 step, so 0.02 remains.
    assert!((pos[0].volume - 0.02).abs() < 1e-9, "volume {}", pos[0].volume);
    // Break-even: entry (4460.0 ask fill) plus the 0.20 spread.
    assert!((pos[0].sl - 4460.2).abs() < 1e-6, "sl {}", pos[0].sl);

    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(trade.tp_hit.contains(&1));
    assert!(!trade.tp_hit.contains(&2));
}

#[tokio::test]
async fn tp_indices_never_retrigger() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let _ticket = open_and_register(&h, 0.03, 4454.0, vec![4463.0, 4466.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4463.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    let after_first = h.sim.positions().await[0].volume;

    // Same price again: TP1 is recorded, nothing else moves.
    h.mgr.tick_account(&h.account).await.unwrap();
    h.mgr.tick_account(&h.account).await.unwrap();
    assert_eq!(h.sim.positions().await[0].volume, after_first);
}

#[tokio::test]
async fn long_mode_enables_runner_and_retrace_closes() {
    let mut cfg = quiet_cfg();
    cfg.runner_retrace_pips = 20.0;
    let h = harness(GENERAL, cfg).await;
    // Three TPs → long schedule.
    let ticket =
        open_and_register(&h, 0.08, 4454.0, vec![4463.0, 4466.0, 4470.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4463.0).await;
    h.mgr.tick_account(&h.account).await.unwrap(); // TP1
    h.sim.set_price("XAUUSD", 4466.0).await;
    h.mgr.tick_account(&h.account).await.unwrap(); // TP2 → runner armed

    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(trade.runner_enabled);
    assert!(trade.tp_hit.contains(&2));

    // Peak 4468, then a 20-pip (2.0) retrace closes the remainder.
    h.sim.set_price("XAUUSD", 4468.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    h.sim.set_price("XAUUSD", 4466.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!(h.sim.positions().await.is_empty());
}

#[tokio::test]
async fn closed_on_broker_prunes_registry() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let ticket = open_and_register(&h, 0.03, 4454.0, vec![4463.0], "hannah").await;

    // Simulate an out-of-band close: wipe the position.
    let acc = h.account.clone();
    h.mgr
        .registry()
        .get("a", ticket)
        .await
        .expect("registered");
    let client_close = executor::types::OrderRequest {
        action: executor::types::ACTION_DEAL,
        symbol: "XAUUSD".into(),
        volume: 0.03,
        order_type: executor::types::ORDER_TYPE_SELL,
        price: 4459.8,
        sl: 0.0,
        tp: 0.0,
        deviation: 50,
        magic: 624011,
        comment: "manual".into(),
        type_time: 0,
        type_filling: executor::types::FILLING_IOC,
        position: Some(ticket),
    };
    h.sim.order_send(&client_close).await.unwrap();

    h.mgr.tick_account(&acc).await.unwrap();
    assert!(h.mgr.registry().get("a", ticket).await.is_none());
}

#[tokio::test]
async fn untracked_magic_position_is_adopted() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let ticket = open_market(&h.sim, "XAUUSD", Direction::Buy, 0.05, 4450.0, 624011).await;
    // Foreign-magic positions stay invisible.
    let foreign = open_market(&h.sim, "XAUUSD", Direction::Buy, 0.05, 4450.0, 111).await;

    h.mgr.tick_account(&h.account).await.unwrap();

    let adopted = h.mgr.registry().get("a", ticket).await.unwrap();
    assert_eq!(adopted.provider_tag, "RECOVERED");
    assert!(adopted.tps.is_empty());
    assert_eq!(adopted.planned_sl, 4450.0);
    assert!(h.mgr.registry().get("a", foreign).await.is_none());
}

// ─── Trailing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn trailing_only_improves_and_respects_min_change() {
    let cfg = ManagerConfig {
        enable_trailing: true,
        enable_addon: false,
        trailing_activation_pips: 10.0,
        trailing_stop_pips: 20.0,
        trailing_min_change_pips: 1.0,
        trailing_cooldown: Duration::from_millis(0),
        ..ManagerConfig::default()
    };
    let h = harness(GENERAL, cfg).await;
    let _t = open_and_register(&h, 0.03, 4454.0, vec![4470.0], "hannah").await;

    // +20 pips → SL trails to 4462 - 2.0 = 4460.0
    h.sim.set_price("XAUUSD", 4462.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!((h.sim.positions().await[0].sl - 4460.0).abs() < 1e-9);

    // Pullback: the would-be SL (4459.0) does not improve, so untouched.
    h.sim.set_price("XAUUSD", 4461.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!((h.sim.positions().await[0].sl - 4460.0).abs() < 1e-9);

    // New high with ≥ 1 pip of improvement → ratchets.
    h.sim.set_price("XAUUSD", 4463.5).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!((h.sim.positions().await[0].sl - 4461.5).abs() < 1e-9);
}

// ─── Addon ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn addon_opens_once_at_midpoint() {
    let cfg = ManagerConfig {
        enable_trailing: false,
        enable_addon: true,
        addon_max: 1,
        addon_min_seconds_from_open: 0,
        ..ManagerConfig::default()
    };
    let h = harness(GENERAL, cfg).await;
    let ticket = open_and_register(&h, 0.03, 4454.0, vec![4463.0, 4466.0], "hannah").await;

    // Midpoint of 4460/4454 is 4457; retrace there triggers the addon.
    h.sim.set_price("XAUUSD", 4457.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();

    let positions = h.sim.positions().await;
    assert_eq!(positions.len(), 2);
    let addon = positions.iter().find(|p| p.ticket != ticket).unwrap();
    assert!((addon.volume - 0.01).abs() < 1e-9); // 0.03 × 0.5 rounded to step
    assert_eq!(addon.sl, 4454.0);

    let base = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(base.addon_done);
    let registered = h.mgr.registry().get("a", addon.ticket).await.unwrap();
    assert_eq!(registered.group_id, base.group_id);
    assert!(registered.provider_tag.contains("-ADDON"));

    // Bounded: a second retrace tick opens nothing more.
    h.mgr.tick_account(&h.account).await.unwrap();
    assert_eq!(h.sim.positions().await.len(), 2);
}

#[tokio::test]
async fn addon_not_opened_next_to_the_stop() {
    let cfg = ManagerConfig {
        enable_trailing: false,
        enable_addon: true,
        addon_max: 1,
        addon_min_seconds_from_open: 0,
        ..ManagerConfig::default()
    };
    let h = harness(GENERAL, cfg).await;
    let _t = open_and_register(&h, 0.03, 4456.9, vec![4463.0], "hannah").await;

    // Midpoint ≈ 4458.45; price there is within 2×buffer of the 4456.9 SL.
    h.sim.set_price("XAUUSD", 4457.2).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert_eq!(h.sim.positions().await.len(), 1);
}

// ─── Scaling-out (TP-less ToroFX) ─────────────────────────────────────────────

#[tokio::test]
async fn scaling_out_tramos_with_final_trailing() {
    let h = harness(GENERAL, quiet_cfg()).await;
    h.sim.set_tick("XAUUSD", 4330.0, 4330.2).await;
    let ticket = open_and_register(&h, 0.16, 4320.0, vec![], "TOROFX").await;
    let entry = 4330.2; // ask fill

    // Tramo 1 at +41 pips: close 25%, SL → break-even.
    h.sim.set_price("XAUUSD", entry + 4.1).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    let pos = h.sim.positions().await;
    assert!((pos[0].volume - 0.12).abs() < 1e-9);
    assert!((pos[0].sl - (entry + 0.2)).abs() < 1e-6, "sl {}", pos[0].sl);

    // Tramo 2 at +81 pips: another 25% of what remains.
    h.sim.set_price("XAUUSD", entry + 8.1).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!((h.sim.positions().await[0].volume - 0.09).abs() < 1e-9);

    // Tramo 3 at +121 pips: 25% again, SL re-anchored at the tramo-1 close,
    // dedicated trailing armed.
    h.sim.set_price("XAUUSD", entry + 12.1).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    let pos = h.sim.positions().await;
    assert!((pos[0].volume - 0.07).abs() < 1e-9);
    assert!((pos[0].sl - (entry + 4.1 + 0.2)).abs() < 1e-6, "sl {}", pos[0].sl);
    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(trade.tramo_trailing_active);

    // A retrace deeper than 40 pips from the peak closes the remainder.
    h.sim.set_price("XAUUSD", entry + 7.9).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!(h.sim.positions().await.is_empty());
}

// ─── Trading modes ────────────────────────────────────────────────────────────

const BE_PIPS_ACC: &str =
    r#"{"name":"a","host":"h","port":1,"fixed_lot":0.1,"trading_mode":"be_pips","be_pips":20.0}"#;
const BE_PNL_ACC: &str =
    r#"{"name":"a","host":"h","port":1,"fixed_lot":0.1,"trading_mode":"be_pnl","be_pips":20.0}"#;
const REENTRY_ACC: &str =
    r#"{"name":"a","host":"h","port":1,"fixed_lot":0.03,"trading_mode":"reentry"}"#;

#[tokio::test]
async fn be_pips_banks_thirty_percent_once() {
    let h = harness(BE_PIPS_ACC, quiet_cfg()).await;
    let ticket = open_and_register(&h, 0.10, 4454.0, vec![4480.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4462.0).await; // +20 pips from the 4460 fill
    h.mgr.tick_account(&h.account).await.unwrap();

    let pos = h.sim.positions().await;
    assert!((pos[0].volume - 0.07).abs() < 1e-9);
    assert!((pos[0].sl - 4460.2).abs() < 1e-6); // entry + spread

    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(trade.be_applied);

    // Idempotent: further progress does not re-bank.
    h.sim.set_price("XAUUSD", 4462.5).await;
    h.mgr.tick_account(&h.account).await.unwrap();
    assert!((h.sim.positions().await[0].volume - 0.07).abs() < 1e-9);
}

#[tokio::test]
async fn be_pnl_locks_in_the_partial_profit() {
    let h = harness(BE_PNL_ACC, quiet_cfg()).await;
    let _t = open_and_register(&h, 0.10, 4454.0, vec![4480.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4462.0).await; // +20 pips → profit $2.00
    h.mgr.tick_account(&h.account).await.unwrap();

    let pos = h.sim.positions().await;
    assert!((pos[0].volume - 0.07).abs() < 1e-9);
    // Partial banked 30% of $2.00 = $0.60; the 0.07 residual loses $0.60 at
    // 8.57 pips below the 4460 entry → SL ≈ 4459.14.
    assert!((pos[0].sl - 4459.14).abs() < 1e-6, "sl {}", pos[0].sl);
}

#[tokio::test]
async fn reentry_closes_full_and_opens_runner() {
    let h = harness(REENTRY_ACC, quiet_cfg()).await;
    let ticket = open_and_register(&h, 0.03, 4454.0, vec![4463.0, 4466.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4463.0).await;
    h.mgr.tick_account(&h.account).await.unwrap();

    let positions = h.sim.positions().await;
    assert_eq!(positions.len(), 1, "original closed, runner open");
    let runner = &positions[0];
    assert_ne!(runner.ticket, ticket);
    assert!((runner.volume - 0.01).abs() < 1e-9); // 30% of 0.03, clamped up
    assert_eq!(runner.sl, 4460.0); // original entry price
    assert_eq!(runner.tp, 4466.0); // TP2

    let registered = h.mgr.registry().get("a", runner.ticket).await.unwrap();
    assert!(registered.provider_tag.ends_with("_REENTRY"));
    assert_eq!(registered.group_id, ticket);
}

#[tokio::test]
async fn reentry_vetoed_by_momentum_filter_outside_grace() {
    let h = harness(REENTRY_ACC, quiet_cfg()).await;
    let account = h.account.clone();
    let exec = Arc::new(Mt5Executor::new(
        vec![account.clone()],
        Arc::new(NullConnector),
        ExecutorConfig::default(),
    ));
    exec.install_client(&account.name, h.sim.clone()).await;
    let (events, _rx) = EventSink::channel();
    let mgr = Arc::new(
        TradeManager::new(exec, TradeRegistry::new(), quiet_cfg(), events)
            .with_momentum_filter(Arc::new(|_| false)),
    );

    let ticket = open_market(&h.sim, "XAUUSD", Direction::Buy, 0.03, 4454.0, 624011).await;
    mgr.registry()
        .register(ManagedTrade::new(
            &account.name,
            ticket,
            "XAUUSD",
            Direction::Buy,
            "hannah",
            vec![4463.0, 4466.0],
            4454.0,
            None,
        ))
        .await;
    mgr.tick_account(&account).await.unwrap();
    // TP1 happened a while ago; the grace window is over.
    let long_ago = tokio::time::Instant::now()
        .checked_sub(Duration::from_secs(10))
        .expect("process older than the grace window");
    mgr.registry()
        .update(&account.name, ticket, |t| {
            t.reentry_tp1_at = Some(long_ago);
        })
        .await;

    h.sim.set_price("XAUUSD", 4463.0).await;
    mgr.tick_account(&account).await.unwrap();

    assert!(h.sim.positions().await.is_empty(), "closed, but no runner");
}

// ─── Management messages ──────────────────────────────────────────────────────

#[tokio::test]
async fn torofx_breakeven_applies_exactly_once() {
    let h = harness(GENERAL, quiet_cfg()).await;
    h.sim.set_tick("XAUUSD", 4330.0, 4330.2).await;
    let ticket = open_and_register(&h, 0.05, 4320.0, vec![], "TOROFX").await;
    // In profit when the risk-off message lands.
    h.sim.set_price("XAUUSD", 4335.0).await;

    assert!(h
        .mgr
        .handle_torofx_management("Asegurando profits, quitando riesgo")
        .await
        .unwrap());
    let sl_after = h.sim.positions().await[0].sl;
    assert!((sl_after - 4330.4).abs() < 1e-6, "entry + spread, got {sl_after}");

    // The identical message again must not touch the position.
    let sltp_before = count_sltp(&h.sim).await;
    assert!(h
        .mgr
        .handle_torofx_management("Asegurando profits, quitando riesgo")
        .await
        .unwrap());
    assert_eq!(count_sltp(&h.sim).await, sltp_before);

    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(trade.actions_done.contains("TOROFX_BE"));
}

#[tokio::test]
async fn torofx_partial_requires_pip_progress() {
    let h = harness(GENERAL, quiet_cfg()).await;
    h.sim.set_tick("XAUUSD", 4330.0, 4330.2).await;
    let _t = open_and_register(&h, 0.08, 4320.0, vec![], "TOROFX").await;

    // Only +10 pips of progress: the "+30" gate blocks the partial.
    h.sim.set_price("XAUUSD", 4331.2).await;
    h.mgr
        .handle_torofx_management("Cerrando el 50% +30")
        .await
        .unwrap();
    assert!((h.sim.positions().await[0].volume - 0.08).abs() < 1e-9);

    // +40 pips: now it fires.
    h.sim.set_price("XAUUSD", 4334.2).await;
    h.mgr
        .handle_torofx_management("Cerrando el 50% +30")
        .await
        .unwrap();
    assert!((h.sim.positions().await[0].volume - 0.04).abs() < 1e-9);
}

#[tokio::test]
async fn torofx_close_named_entry_keeps_the_other() {
    let h = harness(GENERAL, quiet_cfg()).await;
    h.sim.set_tick("XAUUSD", 4330.0, 4330.2).await;
    let close_me = open_and_register(&h, 0.05, 4320.0, vec![], "TOROFX").await;
    h.sim.set_tick("XAUUSD", 4325.0, 4325.2).await;
    let keep_me = open_and_register(&h, 0.05, 4318.0, vec![], "TOROFX").await;

    h.mgr
        .handle_torofx_management("cerrando mi entrada de 4330 y dejando 4325")
        .await
        .unwrap();

    let positions = h.sim.positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].ticket, keep_me);
    assert!(h.sim.positions().await.iter().all(|p| p.ticket != close_me));
}

#[tokio::test]
async fn hannah_secure_half_with_breakeven_before_tp1() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let ticket = open_and_register(&h, 0.04, 4454.0, vec![4463.0, 4466.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4461.0).await; // in profit, before TP1
    assert!(h
        .mgr
        .handle_hannah_management("Secure half your Profits & set breakeven")
        .await
        .unwrap());

    let pos = h.sim.positions().await;
    assert!((pos[0].volume - 0.02).abs() < 1e-9);
    assert!((pos[0].sl - 4460.2).abs() < 1e-6);

    // Re-delivery is a no-op.
    let volume = h.sim.positions().await[0].volume;
    h.mgr
        .handle_hannah_management("Secure half your Profits & set breakeven")
        .await
        .unwrap();
    assert_eq!(h.sim.positions().await[0].volume, volume);
    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert!(trade.actions_done.contains("HANNAH_PARTIAL_BE_50"));
}

#[tokio::test]
async fn hannah_closes_in_full_when_breakeven_impossible() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let _t = open_and_register(&h, 0.04, 4454.0, vec![4463.0], "hannah").await;

    h.sim.set_price("XAUUSD", 4458.0).await; // under water
    h.mgr
        .handle_hannah_management("Secure half your Profits & set breakeven")
        .await
        .unwrap();
    assert!(h.sim.positions().await.is_empty());
}

#[tokio::test]
async fn hannah_close_all_alert() {
    let h = harness(GENERAL, quiet_cfg()).await;
    let _a = open_and_register(&h, 0.04, 4454.0, vec![4463.0], "hannah").await;

    h.mgr
        .handle_hannah_management("Price spiked! CLOSE ALL")
        .await
        .unwrap();
    assert!(h.sim.positions().await.is_empty());
}

// ─── FAST upgrade ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_signal_retargets_fast_trade() {
    let h = harness(GENERAL, quiet_cfg()).await;
    h.sim.set_tick("XAUUSD", 2499.8, 2500.0).await;
    let ticket = open_and_register(&h, 0.03, 2470.0, vec![], "GB_FAST").await;

    let signal = ParsedSignal {
        symbol: "XAUUSD".into(),
        direction: Direction::Buy,
        entry_range: Some((2500.0, 2505.0)),
        sl: Some(2490.0),
        tps: vec![2515.0, 2530.0],
        provider_tag: "GB_LONG".into(),
        format_tag: "GB_LONG".into(),
        fast: false,
        hint_price: None,
        chat_id: -1,
        raw_text: String::new(),
        trace: "t".into(),
        upgrade: true,
    };
    let upgraded = h.mgr.apply_signal_upgrade(&signal).await;
    assert_eq!(upgraded, vec![ticket]);

    // Broker SL moved, schedule rewritten, no second position.
    let positions = h.sim.positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].sl, 2490.0);
    let trade = h.mgr.registry().get("a", ticket).await.unwrap();
    assert_eq!(trade.tps, vec![2515.0, 2530.0]);
    assert_eq!(trade.provider_tag, "GB_LONG");
}

async fn count_sltp(sim: &SimBridge) -> usize {
    sim.orders_sent()
        .await
        .iter()
        .filter(|o| o.action == ACTION_SLTP)
        .count()
}
