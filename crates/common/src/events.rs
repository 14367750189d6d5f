//! Outbound event queue.
//!
//! Every producer (executor, trade manager, command translator) holds an
//! `EventSink`; a single dispatcher task drains the queue onto the
//! `trade_events` stream and the notifier. Emission never blocks trading:
//! when the queue is full the event is dropped with a warning.

use tokio::sync::mpsc;
use tracing::warn;

use crate::TradeEvent;

const QUEUE_CAPACITY: usize = 512;

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<TradeEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, mpsc::Receiver<TradeEvent>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (EventSink { tx }, rx)
    }

    /// Fire-and-forget emission.
    pub fn emit(&self, event: TradeEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "Event queue full — dropping trade event");
        }
    }
}
