//! Observability counters exposed by the engine.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of the process-wide counters.
///
/// Counters only ever move forward (except `active_sessions`, which
/// tracks the live registry size) and are never reset mid-process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions successfully spawned since process start.
    pub total_spawned: u64,
    /// Spawn attempts that failed after exhausting retries.
    pub failed_spawns: u64,
    /// Sessions currently registered.
    pub active_sessions: u64,
    /// Decoded bytes emitted to subscribers (first emission only).
    pub bytes_emitted: u64,
    /// Times a reader was paused by crossing the high watermark.
    pub pauses_triggered: u64,
}
