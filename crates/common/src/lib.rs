pub mod bus;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod pips;
pub mod timewindow;
pub mod types;

pub use bus::{streams, Bus, StreamMessage};
pub use config::Settings;
pub use dedup::Deduplicator;
pub use error::{Error, Result};
pub use events::EventSink;
pub use types::*;
