//! Session handles and the engine's concurrent session registry.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use portable_pty::{Child, MasterPty, PtySize};
use tokio::sync::broadcast;
use uuid::Uuid;

use patchbay_types::{AgentKind, ParsedEvent, SessionEvent, SessionStatus, SessionSummary};

use crate::Result;
use crate::error::EngineError;
use crate::fanout::EventFanout;
use crate::flow::{FlowGate, FlowLimits};
use crate::scrollback::{ReplayChunk, ScrollbackBuffer};

/// The pty endpoints a spawn produces. Inside the handle the writer is
/// split off behind its own lock (see `SessionHandle`).
pub struct SessionIo {
    pub writer: Box<dyn Write + Send>,
    pub master: Box<dyn MasterPty + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

/// Master and child, torn down together. Dropping `master` unblocks
/// the reader thread; reaping the child closes the slave side, which
/// errors out a writer stalled on a full input buffer.
pub struct PtyIo {
    pub master: Box<dyn MasterPty + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

/// One live session. Shared between the async engine, the blocking
/// reader thread, and any number of subscribers; everything mutable is
/// behind its own lock or atomic so no caller holds the handle itself
/// locked.
pub struct SessionHandle {
    pub id: Uuid,
    pub command: String,
    pub cwd: PathBuf,
    pub worktree: Option<PathBuf>,
    pub agent: Option<AgentKind>,
    pub created_at: DateTime<Utc>,
    rows: AtomicU16,
    cols: AtomicU16,
    closing: AtomicBool,
    /// Input writes block while the child's pty buffer is full, so the
    /// writer has a lock of its own: teardown must be able to take
    /// `pty` and drop the master while a write is still stalled here.
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    pty: Mutex<Option<PtyIo>>,
    pub flow: FlowGate,
    output: Mutex<OutputState>,
    events: EventFanout<SessionEvent>,
}

/// Scrollback plus the stream-closed flag, under one lock so sequence
/// assignment, broadcast, and the terminal `Exit` stay ordered: once
/// `closed` is set no output can be appended or broadcast.
#[derive(Debug)]
struct OutputState {
    scrollback: ScrollbackBuffer,
    closed: bool,
}

pub struct SessionSettings {
    pub limits: FlowLimits,
    pub scrollback_bytes: usize,
    pub event_capacity: usize,
}

impl SessionHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        command: String,
        cwd: PathBuf,
        worktree: Option<PathBuf>,
        rows: u16,
        cols: u16,
        settings: &SessionSettings,
        io: SessionIo,
    ) -> Self {
        Self {
            id,
            agent: AgentKind::detect(&command),
            command,
            cwd,
            worktree,
            created_at: Utc::now(),
            rows: AtomicU16::new(rows),
            cols: AtomicU16::new(cols),
            closing: AtomicBool::new(false),
            writer: Mutex::new(Some(io.writer)),
            pty: Mutex::new(Some(PtyIo {
                master: io.master,
                child: io.child,
            })),
            flow: FlowGate::new(settings.limits),
            output: Mutex::new(OutputState {
                scrollback: ScrollbackBuffer::new(settings.scrollback_bytes),
                closed: false,
            }),
            events: EventFanout::new(settings.event_capacity),
        }
    }

    /// Record a decoded chunk in scrollback and broadcast it, followed
    /// by any events parsed out of it. Returns the chunk's sequence
    /// number, or `None` if the stream already ended.
    pub fn emit_output(&self, text: String, parsed: Vec<ParsedEvent>) -> Option<u64> {
        let mut output = self.output.lock().unwrap();
        if output.closed {
            return None;
        }
        let seq = output.scrollback.push(text.clone());
        self.events.send(SessionEvent::Data { seq, text });
        for event in parsed {
            self.events.send(SessionEvent::Event { event });
        }
        Some(seq)
    }

    /// Close the stream and broadcast the terminal `Exit`. Returns true
    /// for the caller that actually closed it.
    pub fn emit_exit(&self) -> bool {
        let mut output = self.output.lock().unwrap();
        if output.closed {
            return false;
        }
        output.closed = true;
        self.events.send(SessionEvent::Exit);
        true
    }

    /// Subscribe to the output stream. The replay snapshot and the
    /// receiver are taken under the output lock, so the first live
    /// `Data` frame carries exactly `replay.next_seq`.
    pub fn subscribe_output(&self) -> (ReplayChunk, broadcast::Receiver<SessionEvent>) {
        let output = self.output.lock().unwrap();
        let receiver = self.events.subscribe();
        (output.scrollback.replay(), receiver)
    }

    /// Write bytes to the child's stdin through the pty master. Blocks
    /// while the child's input buffer is full; a concurrent teardown
    /// errors the write out.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        match writer.as_mut() {
            Some(writer) => {
                writer.write_all(bytes)?;
                writer.flush()?;
                Ok(())
            }
            None => Err(EngineError::SessionClosing(self.id)),
        }
    }

    /// Best-effort interrupt (ETX) ahead of teardown. If another write
    /// holds the writer lock the interrupt is skipped rather than
    /// waited for; the close grace period and teardown still run.
    pub fn interrupt(&self) -> Result<()> {
        let Ok(mut writer) = self.writer.try_lock() else {
            return Ok(());
        };
        match writer.as_mut() {
            Some(writer) => {
                writer.write_all(b"\x03")?;
                writer.flush()?;
                Ok(())
            }
            None => Err(EngineError::SessionClosing(self.id)),
        }
    }

    /// Resize the pty and remember the dimensions for summaries.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let pty = self.pty.lock().unwrap();
        match pty.as_ref() {
            Some(io) => {
                io.master
                    .resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    })
                    .map_err(|e| EngineError::PtyError(e.to_string()))?;
                self.rows.store(rows, Ordering::Relaxed);
                self.cols.store(cols, Ordering::Relaxed);
                Ok(())
            }
            None => Err(EngineError::SessionClosing(self.id)),
        }
    }

    pub fn dims(&self) -> (u16, u16) {
        (
            self.rows.load(Ordering::Relaxed),
            self.cols.load(Ordering::Relaxed),
        )
    }

    /// Flag the session as closing. Returns true for the first caller
    /// only, so exactly one closer runs the interrupt-and-grace path.
    pub fn mark_closing(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Detach the master and child for teardown. Returns `Some`
    /// exactly once; later callers see `None` and skip the io shutdown.
    pub fn take_pty(&self) -> Option<PtyIo> {
        self.pty.lock().unwrap().take()
    }

    /// Detach the writer. Callers tear the pty down first: with the
    /// child gone a write stalled on a full input buffer fails and
    /// releases the lock, so this never waits on a child's backlog.
    pub fn take_writer(&self) -> Option<Box<dyn Write + Send>> {
        self.writer.lock().unwrap().take()
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_closing() {
            SessionStatus::Closing
        } else if self.flow.is_paused() {
            SessionStatus::Paused
        } else {
            SessionStatus::Running
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let (rows, cols) = self.dims();
        SessionSummary {
            id: self.id,
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            worktree: self.worktree.clone(),
            agent: self.agent,
            status: self.status(),
            rows,
            cols,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Concurrent id-to-handle map. Callers clone the `Arc` out and drop
/// the shard guard immediately, so no lock is held across pty calls.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove and return the handle. Concurrent callers race; exactly
    /// one observes `Some`, which makes it the finalizer.
    pub fn remove(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(&id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Summaries of every live session, oldest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }
}
