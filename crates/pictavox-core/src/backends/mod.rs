//! Inference backend capabilities.
//!
//! The diffusion and transcription engines are opaque to the rest of the
//! crate. The registry and runtime only see these traits; the concrete
//! worker-process implementation lives in [`python`].

pub mod python;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::StyleKey;
use crate::error::Result;

pub use python::{
    PythonBridgeConfig, PythonDiffusionBackend, PythonDiffusionLoader, PythonTranscriber,
    PythonTranscriberLoader,
};

/// Where a backend's weights currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Metal,
    Cpu,
}

impl DeviceKind {
    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceKind::Cpu)
    }

    /// True for devices whose memory must be handed back before release.
    pub fn is_accelerator(&self) -> bool {
        !self.is_cpu()
    }

    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.starts_with("cuda") {
            DeviceKind::Cuda
        } else if lowered.starts_with("mps") || lowered.starts_with("metal") {
            DeviceKind::Metal
        } else {
            DeviceKind::Cpu
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Metal => "metal",
            DeviceKind::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// Fixed generation parameters, taken from configuration only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceParams {
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
    pub negative_prompt: String,
}

/// Encoded image produced by a backend.
#[derive(Debug, Clone)]
pub struct ImageBytes {
    pub data: Vec<u8>,
    /// File extension matching the encoding, without the dot.
    pub extension: &'static str,
}

impl ImageBytes {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data,
            extension: "png",
        }
    }
}

/// A loaded text-to-image engine.
///
/// All methods block; callers run them on the blocking pool.
pub trait ImageBackend: Send + Sync {
    fn style(&self) -> StyleKey;

    /// Device the weights are resident on.
    fn device(&self) -> DeviceKind;

    fn infer(&self, prompt: &str, params: &InferenceParams) -> Result<ImageBytes>;

    /// Move weights to host memory. Called before [`ImageBackend::release`]
    /// for accelerator-resident backends.
    fn offload_to_host(&self) -> Result<()>;

    /// Tear the engine down. Must be safe to call once after any failure.
    fn release(&self);

    /// Accelerator memory allocated by this engine, if it reports any.
    fn accelerator_memory_mb(&self) -> Option<f64> {
        None
    }
}

/// Constructs image backends on demand.
pub trait BackendLoader: Send + Sync {
    fn load(&self, style: StyleKey) -> Result<Box<dyn ImageBackend>>;

    /// Best-effort memory recovery after a release or a failed load.
    fn reclaim(&self) {}
}

/// Speech-to-text result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Mean segment log-probability, 0.0 when the engine reports none.
    pub confidence: f64,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f32>,
}

/// A loaded speech-to-text engine.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &[u8], format: &str) -> Result<Transcription>;
}

/// Constructs the transcriber the first time audio arrives.
pub trait TranscriberLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Transcriber>>;
}
