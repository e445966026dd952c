//! The session engine: spawn, route, and tear down pty sessions.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use tokio::sync::broadcast;
use uuid::Uuid;

use patchbay_types::{GlobalEvent, MetricsSnapshot, SessionEvent, SessionSummary, SpawnSpec};

use crate::Result;
use crate::error::EngineError;
use crate::fanout::EventFanout;
use crate::flow::FlowLimits;
use crate::metrics::MetricsCollector;
use crate::reader::spawn_chunk_reader;
use crate::registry::{PtyIo, SessionHandle, SessionIo, SessionRegistry, SessionSettings};
use crate::scrollback::ReplayChunk;

/// Engine tuning knobs. The defaults suit interactive agent sessions;
/// servers load overrides from configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Unconsumed bytes at which a session's reader pauses.
    pub high_watermark: u64,
    /// Unconsumed bytes at which a paused reader resumes.
    pub low_watermark: u64,
    /// Size of each pty read.
    pub read_buffer_bytes: usize,
    /// Spawn attempts before giving up.
    pub spawn_attempts: u32,
    /// Per-attempt budget covering pty open and process spawn.
    pub spawn_timeout: Duration,
    /// Pause between the interrupt write and hard teardown on close.
    pub close_grace: Duration,
    /// Retained scrollback per session.
    pub scrollback_bytes: usize,
    /// Broadcast capacity of the per-session and global event channels.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            high_watermark: 512 * 1024,
            low_watermark: 128 * 1024,
            read_buffer_bytes: 4096,
            spawn_attempts: 3,
            spawn_timeout: Duration::from_secs(10),
            close_grace: Duration::from_millis(100),
            scrollback_bytes: 512 * 1024,
            event_capacity: 256,
        }
    }
}

/// State shared between the engine façade, reader threads, and
/// teardown paths.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: SessionRegistry,
    pub(crate) metrics: MetricsCollector,
    pub(crate) global: EventFanout<GlobalEvent>,
}

impl EngineShared {
    /// Remove the session and release everything it holds. Safe to call
    /// from any thread and from multiple paths at once: the registry
    /// removal picks a single winner, and only the winner touches the
    /// io handles. Returns true for that winner.
    pub(crate) fn finalize_session(&self, id: Uuid, cause: &str) -> bool {
        let Some(handle) = self.registry.remove(id) else {
            return false;
        };
        tracing::debug!(target: "patchbay::engine", "finalizing session {} ({})", id, cause);

        if let Some(pty) = handle.take_pty() {
            let PtyIo { master, mut child } = pty;
            // Dropping the master closes the pty; a reader blocked in
            // read() wakes with EOF.
            drop(master);

            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(
                        target: "patchbay::engine",
                        "session {} child already exited: {:?}",
                        id,
                        status
                    );
                }
                Ok(None) => {
                    #[cfg(unix)]
                    {
                        if let Some(pid) = child.process_id() {
                            tracing::debug!(
                                target: "patchbay::engine",
                                "killing process group {} for session {}",
                                pid,
                                id
                            );
                            unsafe {
                                libc::kill(-(pid as i32), libc::SIGKILL);
                            }
                        } else {
                            let _ = child.kill();
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = child.kill();
                    }
                    if let Err(e) = child.wait() {
                        tracing::debug!(
                            target: "patchbay::engine",
                            "session {} reap failed: {}",
                            id,
                            e
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        target: "patchbay::engine",
                        "session {} status poll failed: {}",
                        id,
                        e
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }

        // The child is reaped and its slave side closed, so any write
        // stalled on a full buffer has failed out of the writer lock.
        drop(handle.take_writer());

        // Wake anything blocked on the gate so it can observe the end.
        handle.flow.release();
        handle.emit_exit();
        self.metrics.record_removal();
        self.global
            .send(GlobalEvent::SessionExited { session_id: id });
        tracing::info!(target: "patchbay::engine", "session {} removed ({})", id, cause);
        true
    }
}

/// A subscriber's view of one session: the scrollback snapshot plus a
/// live receiver whose first `Data` frame carries `replay.next_seq`.
pub struct Subscription {
    pub replay: ReplayChunk,
    pub receiver: broadcast::Receiver<SessionEvent>,
}

struct SpawnedParts {
    io: SessionIo,
    reader: Box<dyn Read + Send>,
}

/// Cheap-to-clone façade over the shared engine state.
#[derive(Clone)]
pub struct PtyEngine {
    shared: Arc<EngineShared>,
}

impl PtyEngine {
    pub fn new(config: EngineConfig) -> Self {
        let global = EventFanout::new(config.event_capacity);
        Self {
            shared: Arc::new(EngineShared {
                registry: SessionRegistry::new(),
                metrics: MetricsCollector::new(),
                global,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Spawn a new session. Attempts are retried up to the configured
    /// count, each under its own timeout; only after every attempt has
    /// failed does the whole call fail.
    pub async fn create(&self, spec: SpawnSpec) -> Result<SessionSummary> {
        if spec.rows == 0 || spec.cols == 0 {
            return Err(EngineError::InvalidDimensions {
                rows: spec.rows,
                cols: spec.cols,
            });
        }
        if spec.command.trim().is_empty() {
            return Err(self.spawn_failed(0, "empty command".to_string()));
        }

        let cwd = spec
            .cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        // Sessions with a worktree run inside it; `cwd` stays on the
        // summary as requested.
        let spawn_dir = spec.worktree.clone().unwrap_or_else(|| cwd.clone());

        let attempts = self.shared.config.spawn_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let spec_attempt = spec.clone();
            let dir = spawn_dir.clone();
            let mut task =
                tokio::task::spawn_blocking(move || open_session_pty(&spec_attempt, &dir));

            match tokio::time::timeout(self.shared.config.spawn_timeout, &mut task).await {
                Ok(Ok(Ok(parts))) => {
                    return Ok(self.register(spec, cwd, parts, attempt));
                }
                Ok(Ok(Err(message))) => {
                    last_error = message;
                }
                Ok(Err(join_error)) => {
                    last_error = format!("spawn task failed: {join_error}");
                }
                Err(_) => {
                    // The blocking attempt cannot be cancelled; if it
                    // succeeds after the deadline its child would be
                    // orphaned while a retry spawns a second one, so a
                    // detached task reaps whatever it produces.
                    tokio::spawn(async move {
                        if let Ok(Ok(parts)) = task.await {
                            let _ = tokio::task::spawn_blocking(move || discard_spawned(parts));
                        }
                    });
                    last_error = format!(
                        "attempt timed out after {}ms",
                        self.shared.config.spawn_timeout.as_millis()
                    );
                }
            }
            tracing::warn!(
                target: "patchbay::engine",
                "spawn attempt {}/{} for '{}' failed: {}",
                attempt,
                attempts,
                spec.command,
                last_error
            );
        }

        Err(self.spawn_failed(attempts, format!("'{}': {}", spec.command, last_error)))
    }

    fn register(
        &self,
        spec: SpawnSpec,
        cwd: PathBuf,
        parts: SpawnedParts,
        attempt: u32,
    ) -> SessionSummary {
        let settings = SessionSettings {
            limits: FlowLimits {
                high: self.shared.config.high_watermark,
                low: self.shared.config.low_watermark,
            },
            scrollback_bytes: self.shared.config.scrollback_bytes,
            event_capacity: self.shared.config.event_capacity,
        };
        let handle = Arc::new(SessionHandle::new(
            Uuid::new_v4(),
            spec.command,
            cwd,
            spec.worktree,
            spec.rows,
            spec.cols,
            &settings,
            parts.io,
        ));

        // Registered before the reader starts; the reader finds its
        // session by id on every iteration.
        self.shared.registry.insert(handle.clone());
        self.shared.metrics.record_spawn();

        let summary = handle.summary();
        self.shared.global.send(GlobalEvent::SessionStarted {
            session: summary.clone(),
        });
        spawn_chunk_reader(self.shared.clone(), handle.id, parts.reader);

        tracing::info!(
            target: "patchbay::engine",
            "session {} spawned: '{}' in {} (attempt {})",
            handle.id,
            handle.command,
            handle.cwd.display(),
            attempt
        );
        summary
    }

    fn spawn_failed(&self, attempts: u32, message: String) -> EngineError {
        self.shared.metrics.record_spawn_failure();
        self.shared.global.send(GlobalEvent::SpawnFailed {
            message: message.clone(),
        });
        tracing::warn!(target: "patchbay::engine", "spawn failed: {}", message);
        EngineError::SpawnFailed { attempts, message }
    }

    /// Write input bytes to a session's stdin.
    pub fn write(&self, id: Uuid, data: &[u8]) -> Result<()> {
        let handle = self
            .shared
            .registry
            .get(id)
            .ok_or(EngineError::SessionNotFound(id))?;
        handle.write_bytes(data)
    }

    /// Resize a session's pty. Dimensions are validated before the
    /// session lookup, so a bad resize of a missing session reports the
    /// dimension error.
    pub fn resize(&self, id: Uuid, rows: u16, cols: u16) -> Result<()> {
        if rows == 0 || cols == 0 {
            return Err(EngineError::InvalidDimensions { rows, cols });
        }
        let handle = self
            .shared
            .registry
            .get(id)
            .ok_or(EngineError::SessionNotFound(id))?;
        handle.resize(rows, cols)?;
        tracing::debug!(target: "patchbay::engine", "session {} resized to {}x{}", id, rows, cols);
        Ok(())
    }

    /// Engage the explicit pause on a session's output.
    pub fn pause(&self, id: Uuid) -> Result<()> {
        let handle = self
            .shared
            .registry
            .get(id)
            .ok_or(EngineError::SessionNotFound(id))?;
        if handle.flow.pause() {
            self.shared.metrics.record_pause();
            tracing::debug!(target: "patchbay::engine", "session {} paused", id);
        }
        Ok(())
    }

    /// Release the explicit pause. The session stays paused while the
    /// backpressure pause is still engaged.
    pub fn resume(&self, id: Uuid) -> Result<()> {
        let handle = self
            .shared
            .registry
            .get(id)
            .ok_or(EngineError::SessionNotFound(id))?;
        handle.flow.resume();
        tracing::debug!(target: "patchbay::engine", "session {} resumed", id);
        Ok(())
    }

    /// Account bytes a consumer has drained from the session's stream.
    pub fn report_consumed(&self, id: Uuid, bytes: u64) -> Result<()> {
        let handle = self
            .shared
            .registry
            .get(id)
            .ok_or(EngineError::SessionNotFound(id))?;
        if handle.flow.record_consumed(bytes) {
            tracing::debug!(target: "patchbay::engine", "session {} resumed by drain", id);
        }
        Ok(())
    }

    /// Close a session: interrupt, a short grace for final output, then
    /// hard teardown. Idempotent; closing an unknown or already-closed
    /// session succeeds.
    pub async fn close(&self, id: Uuid) -> Result<()> {
        let Some(handle) = self.shared.registry.get(id) else {
            return Ok(());
        };

        if handle.mark_closing() {
            // First closer sends the interrupt; a failed write means
            // the child is already going away.
            if let Err(e) = handle.interrupt() {
                tracing::debug!(
                    target: "patchbay::engine",
                    "session {} interrupt write failed: {}",
                    id,
                    e
                );
            }
        }
        drop(handle);

        // Every closer waits out the grace period, so a concurrent
        // close joins the first rather than cutting its grace short.
        tokio::time::sleep(self.shared.config.close_grace).await;

        let shared = self.shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shared.finalize_session(id, "close")).await
        {
            tracing::warn!(target: "patchbay::engine", "close of session {} panicked: {}", id, e);
        }
        Ok(())
    }

    /// Subscribe to a session's output stream with scrollback replay.
    pub fn subscribe(&self, id: Uuid) -> Result<Subscription> {
        let handle = self
            .shared
            .registry
            .get(id)
            .ok_or(EngineError::SessionNotFound(id))?;
        let (replay, receiver) = handle.subscribe_output();
        Ok(Subscription { replay, receiver })
    }

    /// Subscribe to engine-wide lifecycle events.
    pub fn subscribe_global(&self) -> broadcast::Receiver<GlobalEvent> {
        self.shared.global.subscribe()
    }

    pub fn get_summary(&self, id: Uuid) -> Result<SessionSummary> {
        self.shared
            .registry
            .get(id)
            .map(|handle| handle.summary())
            .ok_or(EngineError::SessionNotFound(id))
    }

    /// Summaries of every live session, oldest first.
    pub fn list_active(&self) -> Vec<SessionSummary> {
        self.shared.registry.summaries()
    }

    pub fn active_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Close every live session. Used on server shutdown.
    pub async fn shutdown(&self) {
        let ids = self.shared.registry.ids();
        if ids.is_empty() {
            return;
        }
        tracing::info!(target: "patchbay::engine", "shutting down {} session(s)", ids.len());
        let closes = ids.into_iter().map(|id| self.close(id));
        let _ = futures::future::join_all(closes).await;
    }
}

/// Tear down the product of a spawn attempt that lost its race with
/// the timeout. The child never reached the registry, so it is killed
/// and reaped here.
fn discard_spawned(parts: SpawnedParts) {
    let SpawnedParts { io, reader } = parts;
    let SessionIo {
        writer,
        master,
        mut child,
    } = io;
    drop(reader);
    drop(writer);
    drop(master);
    let _ = child.kill();
    let _ = child.wait();
}

/// Open a pty pair, spawn the child onto its slave side, and hand back
/// the io endpoints. Runs on the blocking pool; errors come back as
/// strings for the retry loop to aggregate.
fn open_session_pty(spec: &SpawnSpec, dir: &Path) -> std::result::Result<SpawnedParts, String> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| format!("openpty: {e}"))?;

    let mut cmd = CommandBuilder::new(&spec.command);
    cmd.args(&spec.args);
    cmd.cwd(dir);
    if !spec.env.contains_key("TERM") {
        cmd.env("TERM", "xterm-256color");
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| format!("spawn: {e}"))?;
    // The slave side lives in the child now.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| format!("clone reader: {e}"))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| format!("take writer: {e}"))?;

    Ok(SpawnedParts {
        io: SessionIo {
            writer,
            master: pair.master,
            child,
        },
        reader,
    })
}
