pub mod addon;
pub mod breakeven;
pub mod manager;
pub mod messages;
pub mod modes;
pub mod profits;
pub mod scaling;
pub mod trade;
pub mod trailing;

pub use manager::{ManagerConfig, MomentumFilter, TradeManager};
pub use trade::{ManagedTrade, TradeRegistry};
