//! Structured events classified out of session output, and the stream
//! frames that carry them to subscribers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SessionSummary;

/// A structured event derived from one line of decoded output.
///
/// Zero or many are produced per chunk; when several patterns match they
/// are all emitted in detection order and the consumer decides which to
/// act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedEvent {
    /// A provider rate-limit notice.
    RateLimit {
        /// Provider the phrasing was attributed to (e.g. "anthropic").
        provider: String,
        /// Seconds until retry, when the line carried a Retry-After hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
    /// A transient status line (spinner text and similar redraw chatter).
    StatusLine { text: String },
    /// A numeric progress report, 0-100.
    Progress { percent: u8 },
    /// A URL embedded in output. Ids are sequential within one session.
    LinkDetected { url: String, id: u64 },
    /// A warning line.
    Warning { text: String },
}

/// One frame on a per-session subscription stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Decoded output. `seq` is the chunk's scrollback sequence number.
    Data { seq: u64, text: String },
    /// A structured event parsed from the output.
    Event { event: ParsedEvent },
    /// The session ended and was removed. Always the final frame.
    Exit,
}

/// One frame on the process-wide event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GlobalEvent {
    /// A session was spawned and registered.
    SessionStarted { session: SessionSummary },
    /// A session was removed, by explicit close or child exit.
    SessionExited { session_id: Uuid },
    /// A spawn failed after exhausting its retries.
    SpawnFailed { message: String },
}
