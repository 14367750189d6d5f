//! JSON-over-HTTP client for the terminal-side MT5 RPC server.
//!
//! Each method POSTs to `http://<host>:<port>/rpc/<method>` and decodes the
//! JSON reply. Calls share one pooled `reqwest` client with a hard request
//! timeout so a hung terminal cannot stall an account task forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use common::{AccountConfig, Error, Result};

use crate::bridge::{BridgeConnector, Mt5Bridge};
use crate::types::{AccountInfo, OrderRequest, OrderResult, PositionInfo, SymbolInfo, Tick};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpBridge {
    base: String,
    http: reqwest::Client,
}

impl HttpBridge {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base: format!("http://{host}:{port}"),
            http,
        })
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T> {
        let url = format!("{}/rpc/{method}", self.base);
        debug!(url = %url, "bridge rpc");
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Bridge(format!("{method}: HTTP {status}: {text}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| Error::Bridge(format!("{method}: bad response: {e}")))
    }
}

#[async_trait]
impl Mt5Bridge for HttpBridge {
    async fn symbol_select(&self, symbol: &str, enable: bool) -> Result<bool> {
        self.call("symbol_select", &json!({ "symbol": symbol, "enable": enable }))
            .await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>> {
        self.call("symbol_info", &json!({ "symbol": symbol })).await
    }

    async fn symbol_info_tick(&self, symbol: &str) -> Result<Option<Tick>> {
        self.call("symbol_info_tick", &json!({ "symbol": symbol }))
            .await
    }

    async fn positions_get(&self, ticket: Option<u64>) -> Result<Vec<PositionInfo>> {
        let positions: Option<Vec<PositionInfo>> = self
            .call("positions_get", &json!({ "ticket": ticket }))
            .await?;
        Ok(positions.unwrap_or_default())
    }

    async fn order_send(&self, req: &OrderRequest) -> Result<OrderResult> {
        self.call("order_send", req).await
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        self.call("account_info", &json!({})).await
    }
}

/// Builds an `HttpBridge` from the account's host/port.
pub struct HttpConnector;

#[async_trait]
impl BridgeConnector for HttpConnector {
    async fn connect(&self, account: &AccountConfig) -> Result<Arc<dyn Mt5Bridge>> {
        let bridge = HttpBridge::new(&account.host, account.port)?;
        // Probe so a dead terminal surfaces at connect time, not mid-trade.
        bridge.account_info().await?;
        Ok(Arc::new(bridge))
    }
}
