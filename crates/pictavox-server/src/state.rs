//! Application state shared by every handler

use pictavox_core::InferenceEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    /// Expose internal error detail in responses
    pub debug: bool,
    /// Rate-limit by `X-Forwarded-For` instead of the peer address
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(engine: InferenceEngine, trust_forwarded_for: bool) -> Self {
        let debug = engine.config().debug;
        Self {
            engine: Arc::new(engine),
            debug,
            trust_forwarded_for,
        }
    }
}
