//! WebSocket message protocol between remote consumers and the server.
//!
//! Client messages are tagged with `type`; server frames are tagged with
//! `kind` and extend the per-session stream frame set (`data` / `event` /
//! `exit`) with connection-level frames (`replay`, `pong`, `error`).

use serde::{Deserialize, Serialize};

use crate::{ParsedEvent, SessionEvent};

/// Messages sent from client to server on a per-session socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// Raw input for the session's pty (keystrokes, pasted text,
    /// control characters).
    Input { data: String },
    /// Resize the pty.
    Resize { rows: u16, cols: u16 },
    /// Acknowledge that `bytes` of previously delivered data have been
    /// durably handled. Drives backpressure accounting; omitting it
    /// degrades backpressure precision without corrupting engine state.
    Consumed { bytes: u64 },
    /// Gate the session's reader.
    Pause,
    /// Release an explicit pause.
    Resume,
    /// Keepalive.
    Ping { timestamp: u64 },
}

/// Frames sent from server to client on a per-session socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// Buffered scrollback, sent once immediately after connect and
    /// before any live frame. Covers sequence numbers
    /// `start_seq..next_seq`; an empty buffer has `start_seq == next_seq`.
    /// Replayed bytes are not subject to `consumed` accounting.
    Replay {
        start_seq: u64,
        next_seq: u64,
        text: String,
    },
    /// Live decoded output.
    Data { seq: u64, text: String },
    /// Structured event parsed from the output.
    Event { event: ParsedEvent },
    /// The session ended; no further frames follow.
    Exit,
    /// Keepalive reply, echoing the client's timestamp.
    Pong { timestamp: u64 },
    /// A client message could not be honored.
    Error { message: String },
}

impl From<SessionEvent> for WsServerMessage {
    fn from(ev: SessionEvent) -> Self {
        match ev {
            SessionEvent::Data { seq, text } => WsServerMessage::Data { seq, text },
            SessionEvent::Event { event } => WsServerMessage::Event { event },
            SessionEvent::Exit => WsServerMessage::Exit,
        }
    }
}
