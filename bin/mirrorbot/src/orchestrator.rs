//! Signal and command plumbing around the executor and the trade manager.
//!
//! - `signals_loop` translates `parsed_signals` into `trade_commands`
//!   (trading-window gate, FAST SL fallback, FAST upgrades, account filter).
//! - `commands_loop` consumes `trade_commands` and drives the executor,
//!   registering every opened ticket with the trade manager.
//! - `mgmt_loop` feeds management follow-ups to the manager.
//! - `events_loop` drains the outbound event queue onto `trade_events` and
//!   the Telegram notifier.
//! - `watchdog_loop` probes each account bridge and drops dead connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use common::bus::streams;
use common::pips::{default_sl_price, is_gold};
use common::timewindow::{in_windows, Window};
use common::{
    Bus, Direction, EventSink, MgmtMessage, ParsedSignal, Result, Settings, TradeCommand,
    TradeEvent,
};
use executor::{tick_price, Mt5Executor, OpenRequest};
use manager::TradeManager;
use notifier::TelegramNotifier;

const COMMANDS_GROUP: &str = "executor";
const MGMT_GROUP: &str = "manager";
const SIGNALS_CURSOR_KEY: &str = "signals:last_id";
const READ_COUNT: usize = 50;
const BLOCK_MS: usize = 200;
const WATCHDOG_PERIOD: Duration = Duration::from_secs(30);

pub struct Orchestrator {
    bus: Bus,
    settings: Settings,
    executor: Arc<Mt5Executor>,
    manager: Arc<TradeManager>,
    events: EventSink,
    windows: Vec<Window>,
}

impl Orchestrator {
    pub fn new(
        bus: Bus,
        settings: Settings,
        windows: Vec<Window>,
        executor: Arc<Mt5Executor>,
        manager: Arc<TradeManager>,
        events: EventSink,
    ) -> Self {
        Self {
            bus,
            settings,
            executor,
            manager,
            events,
            windows,
        }
    }

    // ─── Signal translation ───────────────────────────────────────────────

    /// Tail `parsed_signals` from the persisted cursor and translate each
    /// signal into an open command (or an upgrade / skip).
    pub async fn signals_loop(self: Arc<Self>) {
        let mut last_id = self
            .bus
            .get_string(SIGNALS_CURSOR_KEY)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| "$".to_string());
        info!(cursor = %last_id, "signal translator consuming {}", streams::SIGNALS);
        loop {
            let batch = match self
                .bus
                .read_tail(streams::SIGNALS, &last_id, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "signal stream read failed — retrying");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            for msg in batch {
                last_id = msg.id.clone();
                if let Some(signal) = ParsedSignal::from_fields(&msg.fields) {
                    if let Err(e) = self.handle_signal(signal).await {
                        error!(error = %e, "signal handling failed");
                    }
                }
                if let Err(e) = self.bus.set_string(SIGNALS_CURSOR_KEY, &last_id).await {
                    warn!(error = %e, "could not persist signal cursor");
                }
            }
        }
    }

    async fn handle_signal(&self, signal: ParsedSignal) -> Result<()> {
        if !self.windows.is_empty() && !in_windows(&self.windows) {
            info!(trace = %signal.trace, "signal outside trading windows — skipped");
            self.events.emit(TradeEvent::SignalSkipped {
                reason: "outside_windows".to_string(),
                trace: signal.trace.clone(),
            });
            return Ok(());
        }

        let mut sl = signal.sl.unwrap_or(0.0);
        if sl == 0.0 && signal.fast {
            // A FAST entry ships without levels; anchor a temporary SL to
            // the hint (or the live quote) at the default pip distance.
            let price = match signal.hint_price {
                Some(hint) => Some(hint),
                None => self.reference_price(&signal).await,
            };
            let Some(price) = price else {
                warn!(trace = %signal.trace, "no reference price for FAST SL — signal dropped");
                self.events.emit(TradeEvent::SignalSkipped {
                    reason: "no_reference_price".to_string(),
                    trace: signal.trace.clone(),
                });
                return Ok(());
            };
            let default_pips = if is_gold(&signal.symbol) {
                self.settings.default_sl_xauusd_pips
            } else {
                self.settings.default_sl_pips
            };
            sl = default_sl_price(&signal.symbol, signal.direction, price, 0.00001, default_pips);
            info!(trace = %signal.trace, sl = sl, "FAST signal: temporary SL derived");
        }

        if signal.upgrade && !signal.fast {
            let upgraded = self.manager.apply_signal_upgrade(&signal).await;
            if !upgraded.is_empty() {
                info!(trace = %signal.trace, tickets = ?upgraded, "FAST positions retargeted — no new order");
                return Ok(());
            }
            // No live FAST position survived; treat as a fresh signal.
        }

        // A complete signal whose TP1 is already behind the market is stale:
        // don't open, and flatten any FAST position it was meant to refine.
        if !signal.fast && !signal.tps.is_empty() {
            if let Some(price) = self.reference_price(&signal).await {
                let tp1 = signal.tps[0];
                let past_tp1 = match signal.direction {
                    Direction::Buy => price >= tp1,
                    Direction::Sell => price <= tp1,
                };
                if past_tp1 {
                    warn!(trace = %signal.trace, price = price, tp1 = tp1, "price already past TP1 — skipped");
                    self.events.emit(TradeEvent::SignalSkipped {
                        reason: "price_past_tp1".to_string(),
                        trace: signal.trace.clone(),
                    });
                    self.manager
                        .close_fast_trades(&signal.symbol, signal.direction, "complete signal past TP1")
                        .await?;
                    return Ok(());
                }
            }
        }

        let accounts: Vec<String> = self
            .executor
            .accounts()
            .iter()
            .filter(|a| a.active && a.accepts_channel(signal.chat_id))
            .map(|a| a.name.clone())
            .collect();
        if accounts.is_empty() {
            info!(trace = %signal.trace, channel = signal.chat_id, "no account accepts this channel");
            self.events.emit(TradeEvent::SignalSkipped {
                reason: "no_eligible_accounts".to_string(),
                trace: signal.trace.clone(),
            });
            return Ok(());
        }

        let command = TradeCommand::Open {
            signal_id: signal.trace.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_range: signal.entry_range,
            sl,
            tps: signal.tps.clone(),
            provider_tag: signal.provider_tag.clone(),
            accounts,
            source_channel: signal.chat_id,
            timestamp: chrono::Utc::now(),
        };
        self.bus
            .publish(streams::COMMANDS, &[("data", serde_json::to_string(&command)?)])
            .await?;
        Ok(())
    }

    /// Live quote seen by the first connected eligible account.
    async fn reference_price(&self, signal: &ParsedSignal) -> Option<f64> {
        for account in self.executor.accounts().iter().filter(|a| a.active) {
            let Ok(client) = self.executor.client_for(account).await else {
                continue;
            };
            let _ = client.symbol_select(&signal.symbol, true).await;
            if let Ok(price) = tick_price(client.as_ref(), &signal.symbol, signal.direction).await {
                if price > 0.0 {
                    return Some(price);
                }
            }
        }
        None
    }

    // ─── Command consumption ──────────────────────────────────────────────

    pub async fn commands_loop(self: Arc<Self>) {
        if let Err(e) = self.bus.ensure_group(streams::COMMANDS, COMMANDS_GROUP).await {
            warn!(error = %e, "could not create command consumer group");
        }
        let consumer = format!("executor-{}", std::process::id());
        info!("command consumer running on {}", streams::COMMANDS);
        loop {
            let batch = match self
                .bus
                .read_group(streams::COMMANDS, COMMANDS_GROUP, &consumer, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "command stream read failed — retrying");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            for msg in batch {
                if let Some(data) = msg.fields.get("data") {
                    match serde_json::from_str::<TradeCommand>(data) {
                        Ok(command) => {
                            if let Err(e) = self.handle_command(command).await {
                                error!(error = %e, "command execution failed");
                            }
                        }
                        Err(e) => error!(error = %e, "malformed command envelope"),
                    }
                }
                if let Err(e) = self.bus.ack(streams::COMMANDS, COMMANDS_GROUP, &msg.id).await {
                    warn!(id = %msg.id, error = %e, "command ack failed");
                }
            }
        }
    }

    async fn handle_command(&self, command: TradeCommand) -> Result<()> {
        match command {
            TradeCommand::Open {
                signal_id,
                symbol,
                direction,
                entry_range,
                sl,
                tps,
                provider_tag,
                accounts,
                source_channel,
                ..
            } => {
                let request = OpenRequest {
                    provider_tag: provider_tag.clone(),
                    symbol: symbol.clone(),
                    direction,
                    entry_range,
                    sl,
                    tps: tps.clone(),
                    accounts: Some(accounts),
                    source_channel: Some(source_channel),
                };
                let outcome = self.executor.open_complete_trade(&request).await;

                for (account_name, opened) in &outcome.tickets_by_account {
                    let group = if looks_like_recovery(&provider_tag) {
                        self.manager
                            .registry()
                            .infer_group(account_name, &symbol, direction)
                            .await
                    } else {
                        None
                    };
                    self.manager
                        .registry()
                        .register(manager::ManagedTrade::new(
                            account_name,
                            opened.ticket,
                            &symbol,
                            direction,
                            &provider_tag,
                            tps.clone(),
                            opened.sl,
                            group,
                        ))
                        .await;
                    self.events.emit(TradeEvent::TradeOpened {
                        account: account_name.clone(),
                        ticket: opened.ticket,
                        symbol: symbol.clone(),
                        direction,
                        provider_tag: provider_tag.clone(),
                        entry: Some(opened.price),
                        sl: opened.sl,
                        tps: tps.clone(),
                    });
                }
                if !outcome.errors_by_account.is_empty() {
                    self.events.emit(TradeEvent::OpenErrors {
                        trace: signal_id,
                        errors: outcome.errors_by_account,
                    });
                }
            }
            TradeCommand::Close { account, ticket, reason } => {
                let account = self.require_account(&account)?;
                self.executor.partial_close(&account, ticket, 100.0).await?;
                info!(ticket = ticket, reason = %reason, "close command executed");
            }
            TradeCommand::PartialClose { account, ticket, percent } => {
                let account = self.require_account(&account)?;
                self.executor
                    .partial_close(&account, ticket, percent as f64)
                    .await?;
            }
            TradeCommand::ModifySl { account, ticket, sl, reason } => {
                let account = self.require_account(&account)?;
                self.executor.modify_sl(&account, ticket, sl, &reason).await?;
            }
            TradeCommand::Be { account, ticket } => {
                let account = self.require_account(&account)?;
                self.manager.apply_breakeven(&account, ticket).await?;
            }
            TradeCommand::Trailing { account, ticket, sl } => {
                let account = self.require_account(&account)?;
                self.executor.modify_sl(&account, ticket, sl, "trailing").await?;
            }
            TradeCommand::Addon { account, ticket, volume } => {
                let account = self.require_account(&account)?;
                self.manager.manual_addon(&account, ticket, volume).await?;
            }
        }
        Ok(())
    }

    fn require_account(&self, name: &str) -> Result<common::AccountConfig> {
        self.executor
            .account_by_name(name)
            .cloned()
            .ok_or_else(|| common::Error::Config(format!("unknown account '{name}'")))
    }

    // ─── Management consumption ───────────────────────────────────────────

    pub async fn mgmt_loop(self: Arc<Self>) {
        if let Err(e) = self.bus.ensure_group(streams::MGMT, MGMT_GROUP).await {
            warn!(error = %e, "could not create management consumer group");
        }
        let consumer = format!("manager-{}", std::process::id());
        info!("management consumer running on {}", streams::MGMT);
        loop {
            let batch = match self
                .bus
                .read_group(streams::MGMT, MGMT_GROUP, &consumer, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "management stream read failed — retrying");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            for msg in batch {
                let mgmt = MgmtMessage::from_fields(&msg.fields);
                if let Err(e) = self.manager.handle_management(&mgmt).await {
                    error!(error = %e, "management handling failed");
                }
                if let Err(e) = self.bus.ack(streams::MGMT, MGMT_GROUP, &msg.id).await {
                    warn!(id = %msg.id, error = %e, "management ack failed");
                }
            }
        }
    }
}

// ─── Event dispatch ───────────────────────────────────────────────────────────

/// Drain the event queue onto `trade_events` and the notifier. Neither sink
/// may block or fail trading; errors are logged and dropped.
pub async fn events_loop(
    bus: Bus,
    mut rx: mpsc::Receiver<TradeEvent>,
    notifier: Option<Arc<TelegramNotifier>>,
) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(data) => {
                if let Err(e) = bus.publish(streams::EVENTS, &[("data", data)]).await {
                    warn!(error = %e, "trade event publication failed");
                }
            }
            Err(e) => warn!(error = %e, "unserialisable trade event"),
        }
        if let Some(notifier) = &notifier {
            notifier.notify_event(&event).await;
        }
    }
    warn!("event queue closed — dispatcher exiting");
}

// ─── Watchdog ─────────────────────────────────────────────────────────────────

/// Probe every account bridge periodically; a failed probe evicts the pooled
/// connection so the next tick reconnects from scratch.
pub async fn watchdog_loop(executor: Arc<Mt5Executor>) {
    loop {
        sleep(WATCHDOG_PERIOD).await;
        for account in executor.accounts().to_vec() {
            if !account.active {
                continue;
            }
            match executor.client_for(&account).await {
                Ok(client) => {
                    if let Err(e) = client.account_info().await {
                        warn!(account = %account.name, error = %e, "bridge probe failed — reconnecting");
                        executor.evict_client(&account.name).await;
                    }
                }
                Err(e) => {
                    warn!(account = %account.name, error = %e, "bridge unreachable");
                }
            }
        }
    }
}

fn looks_like_recovery(provider_tag: &str) -> bool {
    let up = provider_tag.to_uppercase();
    up.contains("RECOVERY") || up.starts_with("REC") || up.contains(" REC ")
}
