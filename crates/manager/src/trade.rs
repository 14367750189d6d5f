//! In-memory registry of supervised positions.
//!
//! Partitioned by account name; after registration an entry is only mutated
//! from its owning account's tick task (management-message handling included),
//! so short lock windows are enough. Nothing here is persisted; a restart
//! rebuilds the registry from the broker's live positions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info};

use common::Direction;

#[derive(Debug, Clone)]
pub struct ManagedTrade {
    pub account_name: String,
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub provider_tag: String,
    /// Opening ticket of the logical trade; addons and recoveries share it.
    pub group_id: u64,

    pub tps: Vec<f64>,
    pub planned_sl: f64,
    /// 1-based TP indices already executed. Grows monotonically.
    pub tp_hit: BTreeSet<usize>,

    pub mfe_peak_price: Option<f64>,
    pub runner_enabled: bool,
    pub initial_volume: Option<f64>,
    pub entry_price: Option<f64>,

    pub addon_done: bool,
    pub opened_at: Instant,

    pub last_trailing_sl: Option<f64>,
    pub last_trailing_at: Option<Instant>,

    /// At-most-once management actions already taken on this trade.
    pub actions_done: HashSet<String>,

    pub reentry_done: bool,
    pub reentry_tp1_at: Option<Instant>,
    pub be_applied: bool,
    pub sl_pnl_applied: bool,

    // Scaling-out state for TP-less providers.
    pub tramo_trailing_active: bool,
    pub tramo_trailing_peak: Option<f64>,
    pub first_tramo_close_price: Option<f64>,
}

impl ManagedTrade {
    pub fn new(
        account_name: &str,
        ticket: u64,
        symbol: &str,
        direction: Direction,
        provider_tag: &str,
        tps: Vec<f64>,
        planned_sl: f64,
        group_id: Option<u64>,
    ) -> Self {
        Self {
            account_name: account_name.to_string(),
            ticket,
            symbol: symbol.to_string(),
            direction,
            provider_tag: provider_tag.to_string(),
            group_id: group_id.unwrap_or(ticket),
            tps,
            planned_sl,
            tp_hit: BTreeSet::new(),
            mfe_peak_price: None,
            runner_enabled: false,
            initial_volume: None,
            entry_price: None,
            addon_done: false,
            opened_at: Instant::now(),
            last_trailing_sl: None,
            last_trailing_at: None,
            actions_done: HashSet::new(),
            reentry_done: false,
            reentry_tp1_at: None,
            be_applied: false,
            sl_pnl_applied: false,
            tramo_trailing_active: false,
            tramo_trailing_peak: None,
            first_tramo_close_price: None,
        }
    }

    /// Three or more TPs switch the trade onto the long close schedule.
    pub fn is_long_mode(&self) -> bool {
        self.tps.len() >= 3
    }

    pub fn is_addon(&self) -> bool {
        self.provider_tag.to_uppercase().contains("-ADDON")
    }
}

#[derive(Default)]
struct RegistryState {
    trades: HashMap<String, HashMap<u64, ManagedTrade>>,
    group_addons: HashMap<(String, u64), u32>,
}

#[derive(Clone, Default)]
pub struct TradeRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl TradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trade. The SL must be the concrete value sent to the
    /// broker; a zero SL is a caller bug and the registration is refused.
    pub async fn register(&self, trade: ManagedTrade) {
        if trade.planned_sl == 0.0 {
            error!(
                ticket = trade.ticket,
                account = %trade.account_name,
                "registration refused: planned_sl must be the SL actually in force"
            );
            return;
        }
        info!(
            ticket = trade.ticket,
            account = %trade.account_name,
            group = trade.group_id,
            provider = %trade.provider_tag,
            tps = ?trade.tps,
            sl = trade.planned_sl,
            "trade registered"
        );
        let mut state = self.inner.write().await;
        state
            .group_addons
            .entry((trade.account_name.clone(), trade.group_id))
            .or_insert(0);
        state
            .trades
            .entry(trade.account_name.clone())
            .or_default()
            .insert(trade.ticket, trade);
    }

    pub async fn get(&self, account: &str, ticket: u64) -> Option<ManagedTrade> {
        self.inner
            .read()
            .await
            .trades
            .get(account)
            .and_then(|m| m.get(&ticket))
            .cloned()
    }

    pub async fn contains(&self, account: &str, ticket: u64) -> bool {
        self.get(account, ticket).await.is_some()
    }

    pub async fn tickets_for(&self, account: &str) -> Vec<u64> {
        self.inner
            .read()
            .await
            .trades
            .get(account)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn all_for_account(&self, account: &str) -> Vec<ManagedTrade> {
        self.inner
            .read()
            .await
            .trades
            .get(account)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn remove(&self, account: &str, ticket: u64) -> Option<ManagedTrade> {
        self.inner
            .write()
            .await
            .trades
            .get_mut(account)
            .and_then(|m| m.remove(&ticket))
    }

    /// Drop every tracked ticket the broker no longer reports, returning the
    /// removed trades for closure auditing.
    pub async fn remove_missing(&self, account: &str, live: &HashSet<u64>) -> Vec<ManagedTrade> {
        let mut state = self.inner.write().await;
        let Some(trades) = state.trades.get_mut(account) else {
            return Vec::new();
        };
        let gone: Vec<u64> = trades
            .keys()
            .filter(|t| !live.contains(t))
            .copied()
            .collect();
        gone.into_iter().filter_map(|t| trades.remove(&t)).collect()
    }

    /// Apply `f` to a trade in place; returns its result if the trade exists.
    pub async fn update<R>(
        &self,
        account: &str,
        ticket: u64,
        f: impl FnOnce(&mut ManagedTrade) -> R,
    ) -> Option<R> {
        self.inner
            .write()
            .await
            .trades
            .get_mut(account)
            .and_then(|m| m.get_mut(&ticket))
            .map(f)
    }

    /// Trades of a given provider tag across all accounts, matching symbol
    /// and direction (the FAST-upgrade lookup).
    pub async fn find_by_provider(
        &self,
        provider_tag: &str,
        symbol: &str,
        direction: Direction,
    ) -> Vec<ManagedTrade> {
        self.inner
            .read()
            .await
            .trades
            .values()
            .flat_map(|m| m.values())
            .filter(|t| {
                t.provider_tag == provider_tag && t.symbol == symbol && t.direction == direction
            })
            .cloned()
            .collect()
    }

    /// Group of the most recent open trade matching account/symbol/direction;
    /// recovery entries attach to it.
    pub async fn infer_group(
        &self,
        account: &str,
        symbol: &str,
        direction: Direction,
    ) -> Option<u64> {
        self.inner
            .read()
            .await
            .trades
            .get(account)?
            .values()
            .filter(|t| t.symbol == symbol && t.direction == direction)
            .max_by_key(|t| t.opened_at)
            .map(|t| t.group_id)
    }

    pub async fn addon_count(&self, account: &str, group: u64) -> u32 {
        self.inner
            .read()
            .await
            .group_addons
            .get(&(account.to_string(), group))
            .copied()
            .unwrap_or(0)
    }

    pub async fn incr_addon_count(&self, account: &str, group: u64) {
        *self
            .inner
            .write()
            .await
            .group_addons
            .entry((account.to_string(), group))
            .or_insert(0) += 1;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.trades.values().map(|m| m.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(account: &str, ticket: u64) -> ManagedTrade {
        ManagedTrade::new(
            account,
            ticket,
            "XAUUSD",
            Direction::Buy,
            "hannah",
            vec![4463.0, 4466.0],
            4454.0,
            None,
        )
    }

    #[tokio::test]
    async fn zero_sl_registration_is_refused() {
        let reg = TradeRegistry::new();
        let mut t = trade("a", 1);
        t.planned_sl = 0.0;
        reg.register(t).await;
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn registry_is_partitioned_by_account() {
        let reg = TradeRegistry::new();
        reg.register(trade("a", 1)).await;
        reg.register(trade("b", 2)).await;
        assert_eq!(reg.tickets_for("a").await, vec![1]);
        assert_eq!(reg.tickets_for("b").await, vec![2]);
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test]
    async fn remove_missing_prunes_only_dead_tickets() {
        let reg = TradeRegistry::new();
        reg.register(trade("a", 1)).await;
        reg.register(trade("a", 2)).await;
        let live: HashSet<u64> = [2u64].into_iter().collect();
        let gone = reg.remove_missing("a", &live).await;
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].ticket, 1);
        assert!(reg.contains("a", 2).await);
    }

    #[tokio::test]
    async fn group_inference_picks_latest_match() {
        let reg = TradeRegistry::new();
        reg.register(trade("a", 10)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.register(trade("a", 20)).await;
        let group = reg.infer_group("a", "XAUUSD", Direction::Buy).await;
        assert_eq!(group, Some(20));
        assert_eq!(reg.infer_group("a", "EURUSD", Direction::Buy).await, None);
    }

    #[tokio::test]
    async fn addon_counter_per_group() {
        let reg = TradeRegistry::new();
        reg.register(trade("a", 1)).await;
        assert_eq!(reg.addon_count("a", 1).await, 0);
        reg.incr_addon_count("a", 1).await;
        assert_eq!(reg.addon_count("a", 1).await, 1);
    }
}
