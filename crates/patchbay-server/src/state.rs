//! Shared application state.

use crate::config::Config;
use patchbay_core::PtyEngine;

/// Shared application state: the engine plus the configuration it was
/// built from. Constructed once at startup, torn down with the process,
/// and handed to every handler behind an `Arc`.
pub struct AppState {
    pub engine: PtyEngine,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let engine = PtyEngine::new((&config.engine).into());
        Self { engine, config }
    }
}
