//! Session descriptors and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of a registered session.
///
/// Spawning happens inside `create()` (with its retries and per-attempt
/// timeout) before the session is registered, and removed sessions are
/// simply absent from the registry, so a registered session is always in
/// one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The reader is streaming output.
    Running,
    /// The reader is gated, by watermark backpressure or an explicit pause.
    Paused,
    /// Close has begun; handles are being torn down.
    Closing,
}

/// Interactive agent detected from the spawned command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
    Aider,
    Gemini,
}

/// Command basenames mapped to the agent they run. Ordered, first match wins.
const AGENT_COMMANDS: &[(&str, AgentKind)] = &[
    ("claude", AgentKind::Claude),
    ("codex", AgentKind::Codex),
    ("aider", AgentKind::Aider),
    ("gemini", AgentKind::Gemini),
];

impl AgentKind {
    /// Classify a spawn command by its basename. Purely informational:
    /// the tag rides on summaries and never affects engine behavior.
    pub fn detect(command: &str) -> Option<AgentKind> {
        let basename = command
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(command)
            .trim();
        AGENT_COMMANDS
            .iter()
            .find(|(name, _)| basename == *name)
            .map(|(_, kind)| *kind)
    }
}

/// Everything needed to spawn one pty session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSpec {
    /// Program to run.
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; the engine's own cwd when absent.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Initial terminal rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Initial terminal columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Worktree this session operates in, when one owns it.
    #[serde(default)]
    pub worktree: Option<PathBuf>,
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

impl SpawnSpec {
    /// Spec for `command` with default dimensions and inherited cwd/env.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            rows: default_rows(),
            cols: default_cols(),
            worktree: None,
        }
    }
}

/// Point-in-time view of a live session, for listing and for
/// reconciling consumer-side state after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub command: String,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentKind>,
    pub status: SessionStatus,
    pub rows: u16,
    pub cols: u16,
    pub created_at: DateTime<Utc>,
}
