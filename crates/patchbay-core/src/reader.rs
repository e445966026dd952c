//! Blocking reader thread draining one session's pty.
//!
//! One thread per session owns the read half of the pty plus the
//! decoder and parser state. It blocks on the flow gate before each
//! read, so a paused session stops draining the pty and the kernel
//! buffer throttles the child. The thread exits on pty EOF or error
//! and then runs session finalization itself; whichever of the reader
//! and an explicit close reaches the registry first wins.

use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use uuid::Uuid;

use crate::engine::EngineShared;
use crate::parser::OutputParser;
use crate::utf8::Utf8ReadBuffer;

pub(crate) fn spawn_chunk_reader(
    shared: Arc<EngineShared>,
    id: Uuid,
    mut reader: Box<dyn Read + Send>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut decoder = Utf8ReadBuffer::default();
        let mut parser = OutputParser::new();
        let mut buf = vec![0u8; shared.config.read_buffer_bytes];

        tracing::debug!(target: "patchbay::reader", "reader started for session {}", id);

        loop {
            // Looked up fresh each iteration; once the session leaves
            // the registry this thread stops touching its state.
            let Some(handle) = shared.registry.get(id) else {
                break;
            };
            handle.flow.wait_while_paused();
            drop(handle);

            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(target: "patchbay::reader", "pty EOF for session {}", id);
                    break;
                }
                Ok(n) => {
                    let Some(handle) = shared.registry.get(id) else {
                        break;
                    };
                    let text = decoder.consume(&buf[..n]);
                    if text.is_empty() {
                        continue;
                    }

                    let bytes = text.len() as u64;
                    let parsed = parser.parse_chunk(&text);
                    if handle.emit_output(text, parsed).is_none() {
                        // Stream already closed under us.
                        break;
                    }

                    shared.metrics.record_emitted(bytes);
                    if handle.flow.record_emitted(bytes) {
                        shared.metrics.record_pause();
                        tracing::debug!(
                            target: "patchbay::reader",
                            "session {} paused by backpressure",
                            id
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        target: "patchbay::reader",
                        "pty read error for session {}: {}",
                        id,
                        e
                    );
                    break;
                }
            }
        }

        let dropped = decoder.finish();
        if dropped > 0 {
            tracing::debug!(
                target: "patchbay::reader",
                "session {} ended with {} undecodable trailing byte(s)",
                id,
                dropped
            );
        }

        shared.finalize_session(id, "reader");
    })
}
