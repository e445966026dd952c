//! Engine-wide counters, updated lock-free from reader threads and the
//! async side alike.

use std::sync::atomic::{AtomicU64, Ordering};

use patchbay_types::MetricsSnapshot;

#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_spawned: AtomicU64,
    failed_spawns: AtomicU64,
    active_sessions: AtomicU64,
    bytes_emitted: AtomicU64,
    pauses_triggered: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spawn(&self) {
        self.total_spawned.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.failed_spawns.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the active count. Saturates at zero so a double
    /// accounting bug can never wrap the gauge.
    pub fn record_removal(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_emitted(&self, bytes: u64) {
        self.bytes_emitted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_pause(&self) {
        self.pauses_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_spawned: self.total_spawned.load(Ordering::Relaxed),
            failed_spawns: self.failed_spawns.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            bytes_emitted: self.bytes_emitted.load(Ordering::Relaxed),
            pauses_triggered: self.pauses_triggered.load(Ordering::Relaxed),
        }
    }
}
