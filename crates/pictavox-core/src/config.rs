//! Configuration types for the Pictavox engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Main engine configuration.
///
/// Built once at startup and handed to every component; nothing reads
/// configuration from globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding exported diffusion checkpoints
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Directory generated images are written to
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Number of diffusion backends kept loaded at once
    #[serde(default = "default_max_models_in_memory")]
    pub max_models_in_memory: usize,

    /// Seconds a backend may sit unused before it is unloaded
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Resident memory ceiling above which generation requests are refused
    #[serde(default = "default_max_memory_usage_mb")]
    pub max_memory_usage_mb: u64,

    /// Generated images retained on disk
    #[serde(default = "default_max_images_to_keep")]
    pub max_images_to_keep: usize,

    /// Edge length of generated (square) images
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    #[serde(default = "default_inference_steps")]
    pub inference_steps: u32,

    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,

    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,

    /// Rate limit window per client, 0 disables limiting
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Upper bound for a single inference call, 0 means unbounded
    #[serde(default)]
    pub generation_timeout_secs: u64,

    /// Largest accepted audio upload
    #[serde(default = "default_max_audio_size_mb")]
    pub max_audio_size_mb: u64,

    /// Whisper checkpoint size passed to the transcriber
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,

    /// Interpreter used for the worker scripts
    #[serde(default = "default_python_cmd")]
    pub python_cmd: String,

    /// Directory containing the worker scripts
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Expose backend error details to clients
    #[serde(default)]
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            images_dir: default_images_dir(),
            max_models_in_memory: default_max_models_in_memory(),
            model_timeout_secs: default_model_timeout_secs(),
            max_memory_usage_mb: default_max_memory_usage_mb(),
            max_images_to_keep: default_max_images_to_keep(),
            image_size: default_image_size(),
            inference_steps: default_inference_steps(),
            guidance_scale: default_guidance_scale(),
            negative_prompt: default_negative_prompt(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            generation_timeout_secs: 0,
            max_audio_size_mb: default_max_audio_size_mb(),
            whisper_model: default_whisper_model(),
            python_cmd: default_python_cmd(),
            scripts_dir: default_scripts_dir(),
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `PICTAVOX_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_string("PICTAVOX_MODELS_DIR") {
            config.models_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("PICTAVOX_IMAGES_DIR") {
            config.images_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("PICTAVOX_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }
        if let Some(cmd) = env_string("PICTAVOX_PYTHON") {
            config.python_cmd = cmd;
        }
        if let Some(model) = env_string("PICTAVOX_WHISPER_MODEL") {
            config.whisper_model = model;
        }
        env_override("PICTAVOX_MAX_MODELS", &mut config.max_models_in_memory);
        env_override("PICTAVOX_MODEL_TIMEOUT_SECS", &mut config.model_timeout_secs);
        env_override("PICTAVOX_MAX_MEMORY_MB", &mut config.max_memory_usage_mb);
        env_override("PICTAVOX_MAX_IMAGES", &mut config.max_images_to_keep);
        env_override("PICTAVOX_IMAGE_SIZE", &mut config.image_size);
        env_override("PICTAVOX_INFERENCE_STEPS", &mut config.inference_steps);
        env_override("PICTAVOX_GUIDANCE_SCALE", &mut config.guidance_scale);
        env_override(
            "PICTAVOX_RATE_LIMIT_WINDOW_SECS",
            &mut config.rate_limit_window_secs,
        );
        env_override(
            "PICTAVOX_GENERATION_TIMEOUT_SECS",
            &mut config.generation_timeout_secs,
        );
        env_override("PICTAVOX_MAX_AUDIO_MB", &mut config.max_audio_size_mb);
        env_override("PICTAVOX_DEBUG", &mut config.debug);

        config
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_models_in_memory == 0 {
            return Err(Error::Config(
                "max_models_in_memory must be at least 1".to_string(),
            ));
        }
        if self.image_size == 0 || self.image_size % 8 != 0 {
            return Err(Error::Config(format!(
                "image_size must be a positive multiple of 8, got {}",
                self.image_size
            )));
        }
        if self.inference_steps == 0 {
            return Err(Error::Config(
                "inference_steps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        (self.generation_timeout_secs > 0).then(|| Duration::from_secs(self.generation_timeout_secs))
    }

    pub fn max_audio_size_bytes(&self) -> usize {
        (self.max_audio_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
    if let Some(raw) = env_string(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {}='{}', keeping default", key, raw),
        }
    }
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pictavox")
        .join("models")
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_max_models_in_memory() -> usize {
    1
}

fn default_model_timeout_secs() -> u64 {
    300
}

fn default_max_memory_usage_mb() -> u64 {
    8000
}

fn default_max_images_to_keep() -> usize {
    10
}

fn default_image_size() -> u32 {
    512
}

fn default_inference_steps() -> u32 {
    20
}

fn default_guidance_scale() -> f32 {
    7.5
}

fn default_negative_prompt() -> String {
    "blurry, low quality, distorted, deformed".to_string()
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_max_audio_size_mb() -> u64 {
    10
}

fn default_whisper_model() -> String {
    "base".to_string()
}

fn default_python_cmd() -> String {
    "python3".to_string()
}

fn default_scripts_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("scripts")
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,

    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_cors_enabled(),
            trust_forwarded_for: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(host) = env_string("PICTAVOX_HOST") {
            config.host = host;
        }
        env_override("PICTAVOX_PORT", &mut config.port);
        env_override("PICTAVOX_CORS", &mut config.cors_enabled);
        env_override(
            "PICTAVOX_TRUST_FORWARDED_FOR",
            &mut config.trust_forwarded_for,
        );
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_enabled() -> bool {
    true
}
