//! Broadcast fanout for per-session and global event streams.
//!
//! Thin wrapper over `tokio::sync::broadcast` that sends without a
//! receiver requirement: events flow whether or not anyone is watching,
//! and a slow subscriber lags (observing `RecvError::Lagged`) rather
//! than blocking the producer.

use tokio::sync::broadcast;

#[derive(Debug)]
pub struct EventFanout<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventFanout<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to all current subscribers. A send with no subscribers
    /// is not an error; the event is simply dropped.
    pub fn send(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
