//! Single-flight image generation.
//!
//! At most one generation runs at a time. A request arriving while another
//! is in progress is rejected immediately; there is no queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::admission::{sanitize_prompt, RateDecision, RateLimiter};
use crate::artifacts::ArtifactStore;
use crate::backends::{ImageBackend, ImageBytes, InferenceParams};
use crate::catalog::StyleKey;
use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::memory::MemoryProbe;
use crate::registry::ModelRegistry;
use crate::runtime::types::{GenerationRequest, GenerationResult, TimingMetadata};

/// Single-flight slot shared with the blocking inference and persist work.
///
/// The blocking closures keep a clone, so the slot stays held until the
/// backend returns even if the caller's future is dropped mid-inference.
type SharedSlot = Arc<std::sync::Mutex<Option<OwnedMutexGuard<()>>>>;

pub struct GenerationCoordinator {
    params: InferenceParams,
    max_memory_mb: u64,
    max_images: usize,
    inference_timeout: Option<Duration>,
    registry: Arc<ModelRegistry>,
    limiter: RateLimiter,
    artifacts: ArtifactStore,
    memory: Arc<dyn MemoryProbe>,
    in_flight: Arc<Mutex<()>>,
}

impl GenerationCoordinator {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<ModelRegistry>,
        artifacts: ArtifactStore,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            params: InferenceParams {
                steps: config.inference_steps,
                guidance_scale: config.guidance_scale,
                width: config.image_size,
                height: config.image_size,
                negative_prompt: config.negative_prompt.clone(),
            },
            max_memory_mb: config.max_memory_usage_mb,
            max_images: config.max_images_to_keep,
            inference_timeout: config.generation_timeout(),
            registry,
            limiter: RateLimiter::new(config.rate_limit_window()),
            artifacts,
            memory,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Take the single-flight slot, or fail if a generation holds it.
    pub(crate) fn try_hold(&self) -> Result<OwnedMutexGuard<()>> {
        self.in_flight.clone().try_lock_owned().map_err(|_| {
            warn!("Generation request rejected: another generation is in progress");
            Error::GenerationInProgress
        })
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let slot: SharedSlot = Arc::new(std::sync::Mutex::new(Some(self.try_hold()?)));
        let started = Instant::now();

        let prompt = sanitize_prompt(&request.prompt)?;

        if let RateDecision::Limited { retry_after } =
            self.limiter.check_and_record(&request.client_id).await
        {
            warn!("Rate limit exceeded for {}", request.client_id);
            return Err(Error::RateLimited { retry_after });
        }

        let usage = self.memory.usage();
        if usage.rss_mb > self.max_memory_mb as f64 {
            warn!(
                "Memory usage too high: {:.1}MB (limit {}MB)",
                usage.rss_mb, self.max_memory_mb
            );
            return Err(Error::ResourceExhausted {
                used_mb: usage.rss_mb,
                limit_mb: self.max_memory_mb,
            });
        }

        let (style, scores) = match request.style {
            Some(style) => {
                info!("Using requested style: {}", style);
                (style, None)
            }
            None => {
                let classification = classify(&prompt);
                info!(
                    "Selected {} (dreamshaper: {}, realistic_vision: {})",
                    classification.style,
                    classification.dreamshaper_score,
                    classification.realistic_vision_score
                );
                (classification.style, Some(classification))
            }
        };

        let backend = self.registry.acquire(style).await?;

        info!("Generating image with {}: {}", style, preview(&prompt));
        let inference_started = Instant::now();
        let image = self.infer(style, backend, prompt.clone(), &slot).await?;
        let generation_time = inference_started.elapsed();

        let store = self.artifacts.clone();
        let max_images = self.max_images;
        let filename = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            let filename = store.persist(style, &image, &Local::now())?;
            store.cleanup(max_images);
            Ok::<_, Error>(filename)
        })
        .await
        .map_err(|e| Error::Inference(format!("Failed to save image: {}", e)))??;

        Ok(GenerationResult {
            id: Uuid::new_v4().to_string(),
            filename,
            style,
            model_ref: style.model_ref(),
            prompt,
            timing: TimingMetadata {
                generation_time_ms: generation_time.as_secs_f64() * 1000.0,
                total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                steps: self.params.steps,
                guidance_scale: self.params.guidance_scale,
                width: self.params.width,
                height: self.params.height,
            },
            scores,
            memory_usage_mb: self.memory.usage().rss_mb,
        })
    }

    async fn infer(
        &self,
        style: StyleKey,
        backend: Arc<dyn ImageBackend>,
        prompt: String,
        slot: &SharedSlot,
    ) -> Result<ImageBytes> {
        let params = self.params.clone();
        let held = slot.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _slot = held;
            backend.infer(&prompt, &params)
        });

        let joined = match self.inference_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!("{} inference timed out after {:?}", style, limit);
                    self.registry.invalidate(style).await;
                    vacate(slot);
                    return Err(Error::Timeout(limit));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(image)) => Ok(image),
            Ok(Err(e)) if e.is_device_state() => {
                error!("{} backend is in a broken device state: {}", style, e);
                self.registry.invalidate(style).await;
                Err(Error::BackendLoad {
                    model: style.to_string(),
                    detail: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                error!("Error generating image: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("{} inference task failed: {}", style, e);
                self.registry.invalidate(style).await;
                Err(Error::Inference(format!("Inference task failed: {}", e)))
            }
        }
    }
}

/// Give up the slot while the timed-out inference task may still be running.
/// The backend has already been invalidated, so nothing else will use it.
fn vacate(slot: &SharedSlot) {
    let guard = match slot.lock() {
        Ok(mut held) => held.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    drop(guard);
}

fn preview(prompt: &str) -> String {
    const PREVIEW_CHARS: usize = 50;
    if prompt.chars().count() <= PREVIEW_CHARS {
        prompt.to_string()
    } else {
        let head: String = prompt.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}
