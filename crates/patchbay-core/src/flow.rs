//! Backpressure gate between a session's reader thread and its consumers.
//!
//! Unconsumed output is tracked as a byte count. Crossing the high
//! watermark pauses the reader (which stops draining the pty and lets
//! the kernel buffer throttle the child); draining below the low
//! watermark resumes it. The two thresholds form a hysteresis band so a
//! consumer hovering near one boundary does not flap the gate.

use std::sync::{Condvar, Mutex};

/// Watermarks in bytes of unconsumed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLimits {
    pub high: u64,
    pub low: u64,
}

impl Default for FlowLimits {
    fn default() -> Self {
        Self {
            high: 512 * 1024,
            low: 128 * 1024,
        }
    }
}

#[derive(Debug, Default)]
struct FlowState {
    /// Bytes emitted but not yet reported consumed.
    pending: u64,
    /// Set when the high watermark was crossed, cleared below the low.
    auto_paused: bool,
    /// Set and cleared only by explicit pause/resume calls.
    user_paused: bool,
    /// Set once at teardown; the gate never blocks again after this.
    released: bool,
}

/// Why the reader is currently allowed or blocked.
/// Explicit pause and watermark pause are independent bits; resuming one
/// leaves the other in force.
#[derive(Debug)]
pub struct FlowGate {
    limits: FlowLimits,
    state: Mutex<FlowState>,
    resumed: Condvar,
}

impl FlowGate {
    pub fn new(limits: FlowLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(FlowState::default()),
            resumed: Condvar::new(),
        }
    }

    /// Account freshly emitted bytes. Returns true when this call
    /// crossed the high watermark and engaged the automatic pause.
    pub fn record_emitted(&self, bytes: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        state.pending = state.pending.saturating_add(bytes);
        if !state.auto_paused && state.pending >= self.limits.high {
            state.auto_paused = true;
            tracing::debug!(
                target: "patchbay::flow",
                "high watermark crossed at {} pending bytes",
                state.pending
            );
            return true;
        }
        false
    }

    /// Account bytes the consumer has drained. Returns true when this
    /// call dropped strictly below the low watermark and disengaged
    /// the automatic pause.
    pub fn record_consumed(&self, bytes: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        state.pending = state.pending.saturating_sub(bytes);
        if state.auto_paused && state.pending < self.limits.low {
            state.auto_paused = false;
            tracing::debug!(
                target: "patchbay::flow",
                "low watermark reached at {} pending bytes",
                state.pending
            );
            self.resumed.notify_all();
            return true;
        }
        false
    }

    /// Engage the explicit pause. Returns true when this call engaged
    /// it, false when it was already held.
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let engaged = !state.user_paused;
        state.user_paused = true;
        engaged
    }

    /// Release the explicit pause. The gate may still hold if the
    /// automatic pause is engaged.
    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.user_paused = false;
        if !state.auto_paused {
            self.resumed.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        let state = self.state.lock().unwrap();
        (state.auto_paused || state.user_paused) && !state.released
    }

    pub fn pending_bytes(&self) -> u64 {
        self.state.lock().unwrap().pending
    }

    /// Block the calling thread while either pause bit is engaged.
    /// Returns immediately once the gate has been released.
    pub fn wait_while_paused(&self) {
        let state = self.state.lock().unwrap();
        drop(
            self.resumed
                .wait_while(state, |s| (s.auto_paused || s.user_paused) && !s.released)
                .unwrap(),
        );
    }

    /// Permanently open the gate and wake every waiter. Called at
    /// teardown so a paused reader can observe the closed pty.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.released = true;
        self.resumed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn small_gate() -> FlowGate {
        FlowGate::new(FlowLimits { high: 100, low: 20 })
    }

    #[test]
    fn test_high_watermark_engages_once() {
        let gate = small_gate();
        assert!(!gate.record_emitted(99));
        assert!(!gate.is_paused());
        assert!(gate.record_emitted(1));
        assert!(gate.is_paused());
        // Already engaged: further emissions do not re-report the crossing.
        assert!(!gate.record_emitted(50));
    }

    #[test]
    fn test_hysteresis_band() {
        let gate = small_gate();
        gate.record_emitted(100);
        assert!(gate.is_paused());
        // Draining into the band keeps the pause engaged.
        assert!(!gate.record_consumed(50));
        assert!(gate.is_paused());
        // Sitting exactly on the low watermark is still inside the band.
        assert!(!gate.record_consumed(30));
        assert!(gate.is_paused());
        // One more byte drops below it and disengages.
        assert!(gate.record_consumed(1));
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_consumed_never_underflows() {
        let gate = small_gate();
        gate.record_emitted(10);
        gate.record_consumed(1000);
        assert_eq!(gate.pending_bytes(), 0);
    }

    #[test]
    fn test_user_pause_is_independent_of_watermarks() {
        let gate = small_gate();
        assert!(gate.pause());
        // Second engage reports already-held.
        assert!(!gate.pause());
        assert!(gate.is_paused());

        // Watermark recovery does not clear the explicit pause.
        gate.record_emitted(100);
        gate.record_consumed(100);
        assert!(gate.is_paused());

        gate.resume();
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_auto_pause_survives_user_resume() {
        let gate = small_gate();
        gate.record_emitted(100);
        gate.resume();
        assert!(gate.is_paused());
        gate.record_consumed(90);
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_wait_while_paused_wakes_on_drain() {
        let gate = Arc::new(small_gate());
        gate.record_emitted(100);

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.wait_while_paused())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        gate.record_consumed(100);
        waiter.join().unwrap();
    }

    #[test]
    fn test_release_unblocks_and_stays_open() {
        let gate = Arc::new(small_gate());
        gate.record_emitted(100);
        gate.pause();

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.wait_while_paused())
        };
        gate.release();
        waiter.join().unwrap();

        // Released gates never block again, whatever the bits say.
        gate.wait_while_paused();
    }
}
