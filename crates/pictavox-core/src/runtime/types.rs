//! Runtime request/response types.

use serde::Serialize;

use crate::catalog::StyleKey;
use crate::classifier::StyleClassification;
use crate::memory::MemoryUsage;

/// One image generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Explicit style; skips classification when set.
    pub style: Option<StyleKey>,
    /// Identity used for rate limiting, usually the peer IP.
    pub client_id: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            style: None,
            client_id: client_id.into(),
        }
    }

    pub fn with_style(mut self, style: StyleKey) -> Self {
        self.style = Some(style);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingMetadata {
    /// Time spent inside the backend.
    pub generation_time_ms: f64,
    /// Time from admission to the persisted artifact.
    pub total_time_ms: f64,
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub id: String,
    /// Artifact name under the images directory.
    pub filename: String,
    pub style: StyleKey,
    pub model_ref: &'static str,
    /// The sanitized prompt that was actually used.
    pub prompt: String,
    pub timing: TimingMetadata,
    /// Present when the style came from the classifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<StyleClassification>,
    pub memory_usage_mb: f64,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub memory: MemoryUsage,
    pub models_loaded: Vec<StyleKey>,
    pub is_generating: bool,
    pub images_count: usize,
    pub uptime_secs: u64,
    pub transcriber_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub models_unloaded: usize,
    pub images_removed: usize,
    pub memory_usage_mb: f64,
}
