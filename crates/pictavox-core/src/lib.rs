//! Pictavox Core - model lifecycle and request admission for a
//! speech/text-to-image backend.
//!
//! The crate decides which diffusion style a prompt should use, keeps a
//! bounded set of heavyweight backends loaded (LRU plus idle eviction),
//! serializes generation so only one runs at a time, and rejects unsafe,
//! rate-limited or memory-starved requests before any expensive work.
//!
//! # Example
//!
//! ```ignore
//! use pictavox_core::{EngineConfig, GenerationRequest, InferenceEngine};
//!
//! let engine = InferenceEngine::new(EngineConfig::from_env())?;
//! let result = engine
//!     .generate(GenerationRequest::new("a misty forest at dawn", "127.0.0.1"))
//!     .await?;
//! println!("saved {}", result.filename);
//! ```

pub mod admission;
pub mod artifacts;
pub mod backends;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod memory;
pub mod registry;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use admission::{sanitize_prompt, RateDecision, RateLimiter};
pub use artifacts::{ArtifactName, ArtifactStore};
pub use backends::{
    BackendLoader, DeviceKind, ImageBackend, ImageBytes, InferenceParams, Transcriber,
    TranscriberLoader, Transcription,
};
pub use catalog::{parse_style_key, StyleKey, StyleProfile};
pub use classifier::{classify, KeywordMatch, StyleClassification};
pub use config::{EngineConfig, ServerConfig};
pub use error::{Error, Result};
pub use memory::{FixedProbe, MemoryProbe, MemoryUsage, SysinfoProbe};
pub use registry::{ModelRegistry, RegistryConfig};
pub use runtime::{
    CleanupReport, EngineStatus, GenerationRequest, GenerationResult, InferenceEngine,
    SpeechService, TimingMetadata,
};
