//! Shared types for the Patchbay session engine.

mod event;
mod metrics;
mod session;
mod ws;

pub use event::*;
pub use metrics::*;
pub use session::*;
pub use ws::*;
