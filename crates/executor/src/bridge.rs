//! Abstraction over a remote MT5 terminal.
//!
//! `HttpBridge` implements this against the terminal-side RPC server.
//! `sim::SimBridge` implements it in memory for tests and paper runs.
//! One connection per account, pooled; a failed connection is evicted and
//! recreated on the next use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

use common::{AccountConfig, Direction, Error, Result};

use crate::types::{AccountInfo, OrderRequest, OrderResult, PositionInfo, SymbolInfo, Tick};

#[async_trait]
pub trait Mt5Bridge: Send + Sync {
    async fn symbol_select(&self, symbol: &str, enable: bool) -> Result<bool>;

    async fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>>;

    async fn symbol_info_tick(&self, symbol: &str) -> Result<Option<Tick>>;

    /// All positions, or the one matching `ticket`.
    async fn positions_get(&self, ticket: Option<u64>) -> Result<Vec<PositionInfo>>;

    async fn order_send(&self, req: &OrderRequest) -> Result<OrderResult>;

    async fn account_info(&self) -> Result<AccountInfo>;
}

/// Current fill price for a market order of `direction`; 0.0 when the symbol
/// has no quote (not selected or market closed).
pub async fn tick_price(bridge: &dyn Mt5Bridge, symbol: &str, direction: Direction) -> Result<f64> {
    Ok(bridge
        .symbol_info_tick(symbol)
        .await?
        .map(|t| t.entry_price(direction))
        .unwrap_or(0.0))
}

#[async_trait]
pub trait BridgeConnector: Send + Sync {
    async fn connect(&self, account: &AccountConfig) -> Result<Arc<dyn Mt5Bridge>>;
}

const MAX_BACKOFF: Duration = Duration::from_secs(60);

struct Backoff {
    failures: u32,
    retry_at: Instant,
}

/// One bridge per account name, created lazily. Reconnection attempts after
/// a failure back off exponentially, bounded at one minute.
pub struct BridgePool {
    connector: Arc<dyn BridgeConnector>,
    clients: RwLock<HashMap<String, Arc<dyn Mt5Bridge>>>,
    backoff: RwLock<HashMap<String, Backoff>>,
}

impl BridgePool {
    pub fn new(connector: Arc<dyn BridgeConnector>) -> Self {
        Self {
            connector,
            clients: RwLock::new(HashMap::new()),
            backoff: RwLock::new(HashMap::new()),
        }
    }

    pub async fn client_for(&self, account: &AccountConfig) -> Result<Arc<dyn Mt5Bridge>> {
        if let Some(client) = self.clients.read().await.get(&account.name) {
            return Ok(client.clone());
        }
        if let Some(b) = self.backoff.read().await.get(&account.name) {
            if Instant::now() < b.retry_at {
                return Err(Error::Bridge(format!(
                    "reconnect to '{}' backing off ({} failures)",
                    account.name, b.failures
                )));
            }
        }
        match self.connector.connect(account).await {
            Ok(client) => {
                self.backoff.write().await.remove(&account.name);
                self.clients
                    .write()
                    .await
                    .insert(account.name.clone(), client.clone());
                Ok(client)
            }
            Err(e) => {
                let mut backoff = self.backoff.write().await;
                let entry = backoff.entry(account.name.clone()).or_insert(Backoff {
                    failures: 0,
                    retry_at: Instant::now(),
                });
                entry.failures += 1;
                let delay = Duration::from_secs(1 << entry.failures.min(6)).min(MAX_BACKOFF);
                entry.retry_at = Instant::now() + delay;
                warn!(
                    account = %account.name,
                    error = %e,
                    failures = entry.failures,
                    retry_in = ?delay,
                    "Bridge connection failed"
                );
                Err(e)
            }
        }
    }

    /// Drop a pooled connection so the next use reconnects.
    pub async fn evict(&self, account_name: &str) {
        self.clients.write().await.remove(account_name);
    }

    /// Insert a ready-made bridge (used by tests and paper mode).
    pub async fn insert(&self, account_name: &str, bridge: Arc<dyn Mt5Bridge>) {
        self.clients
            .write()
            .await
            .insert(account_name.to_string(), bridge);
    }
}

/// Connector that refuses everything; pools prepopulated via `insert` only.
pub struct NullConnector;

#[async_trait]
impl BridgeConnector for NullConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Arc<dyn Mt5Bridge>> {
        Err(Error::Bridge(format!(
            "no bridge registered for account '{}'",
            account.name
        )))
    }
}
