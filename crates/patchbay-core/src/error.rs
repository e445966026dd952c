//! Engine error types.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session is closing: {0}")]
    SessionClosing(Uuid),

    #[error("Spawn failed after {attempts} attempt(s): {message}")]
    SpawnFailed { attempts: u32, message: String },

    #[error("Invalid dimensions: {rows}x{cols}")]
    InvalidDimensions { rows: u16, cols: u16 },

    #[error("Pty error: {0}")]
    PtyError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl EngineError {
    /// True for errors that mean "no such session", which HTTP surfaces
    /// map to a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::SessionNotFound(_))
    }
}
