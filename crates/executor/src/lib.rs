pub mod bridge;
pub mod executor;
pub mod http;
pub mod lots;
pub mod types;

pub use bridge::{tick_price, BridgeConnector, BridgePool, Mt5Bridge};
pub use executor::{ExecutorConfig, Mt5Executor, OpenOutcome, OpenRequest, OpenedOrder};
pub use http::{HttpBridge, HttpConnector};
pub use types::*;
