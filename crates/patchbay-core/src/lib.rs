//! Patchbay session engine.
//!
//! Spawns agent processes onto ptys, decodes and classifies their
//! output, and fans both the raw stream and parsed events out to any
//! number of subscribers, with byte-accurate backpressure per session.

pub mod ansi;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod flow;
pub mod metrics;
pub mod parser;
mod reader;
pub mod registry;
pub mod scrollback;
pub mod utf8;

pub use engine::{EngineConfig, PtyEngine, Subscription};
pub use error::EngineError;
pub use flow::FlowLimits;
pub use scrollback::ReplayChunk;

pub type Result<T> = std::result::Result<T, EngineError>;
