//! Error types for the Pictavox core

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the core can surface to its callers
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed, unsafe or oversized input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Client exceeded the admission policy
    #[error("Rate limit exceeded, retry after {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Another generation currently holds the single-flight lock
    #[error("Generation already in progress")]
    GenerationInProgress,

    /// Process memory is above the configured ceiling
    #[error("Memory usage {used_mb:.0}MB exceeds limit of {limit_mb}MB")]
    ResourceExhausted { used_mb: f64, limit_mb: u64 },

    /// Backend construction failed; the cache entry has been cleaned up
    #[error("Failed to load {model} backend: {detail}")]
    BackendLoad { model: String, detail: String },

    /// Inference exceeded the configured deadline
    #[error("Inference timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller should be told to try again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. }
                | Error::GenerationInProgress
                | Error::ResourceExhausted { .. }
                | Error::BackendLoad { .. }
                | Error::Timeout(_)
        )
    }

    /// Inference failures caused by a half-initialised device state.
    ///
    /// Diffusers reports these as "meta tensor" errors; the backend that
    /// raised one must not be reused.
    pub fn is_device_state(&self) -> bool {
        match self {
            Error::Inference(msg) | Error::BackendLoad { detail: msg, .. } => {
                msg.to_lowercase().contains("meta tensor")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StyleKey;

    #[test]
    fn retryable_kinds() {
        assert!(Error::GenerationInProgress.is_retryable());
        assert!(Error::RateLimited {
            retry_after: Duration::from_secs(3)
        }
        .is_retryable());
        assert!(Error::BackendLoad {
            model: StyleKey::Dreamshaper.to_string(),
            detail: "boom".into()
        }
        .is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::Inference("bad".into()).is_retryable());
    }

    #[test]
    fn detects_meta_tensor_failures() {
        let err = Error::Inference("Cannot copy out of Meta Tensor; no data!".into());
        assert!(err.is_device_state());
        assert!(!Error::Inference("CUDA out of memory".into()).is_device_state());
    }

    #[test]
    fn rate_limited_message_rounds_up_to_one_second() {
        let err = Error::RateLimited {
            retry_after: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 1s");
    }
}
