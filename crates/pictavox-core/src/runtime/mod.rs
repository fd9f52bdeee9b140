//! Runtime orchestration layer.
//!
//! The engine owns the registry, the single-flight coordinator and the speech
//! service; the HTTP layer talks only to [`InferenceEngine`].

mod coordinator;
mod service;
mod speech;
mod types;

pub use coordinator::GenerationCoordinator;
pub use service::InferenceEngine;
pub use speech::{wav_duration_secs, SpeechService, SUPPORTED_AUDIO_FORMATS};
pub use types::{CleanupReport, EngineStatus, GenerationRequest, GenerationResult, TimingMetadata};
