//! Cache of loaded image backends.
//!
//! Backends are loaded on first use and kept until they go idle, get pushed
//! out by a newer style, or are dropped on request. Every operation runs
//! under one async mutex, so an idle sweep can never race a load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backends::{BackendLoader, ImageBackend};
use crate::catalog::StyleKey;
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Capacity and idle policy.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Most backends held at once.
    pub max_models: usize,
    /// Unused backends older than this are released. Zero disables it.
    pub idle_timeout: Duration,
}

impl RegistryConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            max_models: config.max_models_in_memory,
            idle_timeout: config.model_timeout(),
        }
    }
}

struct CachedBackend {
    backend: Arc<dyn ImageBackend>,
    last_used: Instant,
}

pub struct ModelRegistry {
    config: RegistryConfig,
    loader: Arc<dyn BackendLoader>,
    entries: Mutex<HashMap<StyleKey, CachedBackend>>,
}

impl ModelRegistry {
    pub fn new(config: RegistryConfig, loader: Arc<dyn BackendLoader>) -> Self {
        Self {
            config,
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Return the backend for `style`, loading it if needed.
    pub async fn acquire(&self, style: StyleKey) -> Result<Arc<dyn ImageBackend>> {
        self.acquire_at(style, Instant::now()).await
    }

    pub(crate) async fn acquire_at(
        &self,
        style: StyleKey,
        now: Instant,
    ) -> Result<Arc<dyn ImageBackend>> {
        let mut entries = self.entries.lock().await;

        for (idle_style, backend) in self.take_idle(&mut entries, now) {
            info!("Unloading idle model: {}", idle_style);
            self.release_backend(backend).await;
        }

        if let Some(entry) = entries.get_mut(&style) {
            entry.last_used = now;
            debug!("Using cached {} model", style);
            return Ok(entry.backend.clone());
        }

        while !entries.is_empty() && entries.len() >= self.config.max_models {
            let Some(lru) = Self::least_recently_used(&entries) else {
                break;
            };
            if let Some(evicted) = entries.remove(&lru) {
                info!("Evicting least recently used model: {}", lru);
                self.release_backend(evicted.backend).await;
            }
        }

        info!("Loading {} model ({})", style, style.model_ref());
        let loader = self.loader.clone();
        let loaded = match tokio::task::spawn_blocking(move || loader.load(style)).await {
            Ok(result) => result.map_err(load_detail),
            Err(e) => Err(format!("load task failed: {}", e)),
        };

        match loaded {
            Ok(backend) => {
                let backend: Arc<dyn ImageBackend> = Arc::from(backend);
                entries.insert(
                    style,
                    CachedBackend {
                        backend: backend.clone(),
                        last_used: now,
                    },
                );
                info!("{} model loaded ({} cached)", style, entries.len());
                Ok(backend)
            }
            Err(detail) => {
                error!("Error loading {} model: {}", style, detail);
                entries.remove(&style);
                self.reclaim().await;
                Err(Error::BackendLoad {
                    model: style.to_string(),
                    detail,
                })
            }
        }
    }

    /// Drop the entry for `style`, e.g. after it reported a broken device
    /// state. Returns whether an entry existed.
    pub async fn invalidate(&self, style: StyleKey) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(&style) {
            Some(entry) => {
                warn!("Invalidating {} model", style);
                self.release_backend(entry.backend).await;
                true
            }
            None => {
                self.reclaim().await;
                false
            }
        }
    }

    /// Release idle backends without loading anything.
    pub async fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now()).await
    }

    pub(crate) async fn evict_idle_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().await;
        let idle = self.take_idle(&mut entries, now);
        let count = idle.len();
        for (style, backend) in idle {
            info!("Unloading idle model: {}", style);
            self.release_backend(backend).await;
        }
        count
    }

    /// Release every cached backend, oldest first.
    pub async fn unload_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let mut drained: Vec<_> = entries.drain().collect();
        drained.sort_by_key(|(_, entry)| entry.last_used);

        let count = drained.len();
        for (style, entry) in drained {
            info!("Unloading model: {}", style);
            self.release_backend(entry.backend).await;
        }
        count
    }

    /// Cached styles ordered from least to most recently used.
    pub async fn loaded_styles(&self) -> Vec<StyleKey> {
        let entries = self.entries.lock().await;
        let mut styles: Vec<_> = entries
            .iter()
            .map(|(style, entry)| (*style, entry.last_used))
            .collect();
        styles.sort_by_key(|(_, last_used)| *last_used);
        styles.into_iter().map(|(style, _)| style).collect()
    }

    /// Accelerator memory summed over loaded backends that report it.
    pub async fn accelerator_memory_mb(&self) -> Option<f64> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter_map(|entry| entry.backend.accelerator_memory_mb())
            .fold(None, |total, mb| Some(total.unwrap_or(0.0) + mb))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn take_idle(
        &self,
        entries: &mut HashMap<StyleKey, CachedBackend>,
        now: Instant,
    ) -> Vec<(StyleKey, Arc<dyn ImageBackend>)> {
        let timeout = self.config.idle_timeout;
        if timeout.is_zero() {
            return Vec::new();
        }

        let idle: Vec<StyleKey> = entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_used) > timeout)
            .map(|(style, _)| *style)
            .collect();

        idle.into_iter()
            .filter_map(|style| entries.remove(&style).map(|e| (style, e.backend)))
            .collect()
    }

    fn least_recently_used(entries: &HashMap<StyleKey, CachedBackend>) -> Option<StyleKey> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(style, _)| *style)
    }

    /// Offload (accelerators only), release, then reclaim, on the blocking
    /// pool. Offload failures do not stop the release.
    async fn release_backend(&self, backend: Arc<dyn ImageBackend>) {
        let loader = self.loader.clone();
        let style = backend.style();
        let result = tokio::task::spawn_blocking(move || {
            if backend.device().is_accelerator() {
                if let Err(e) = backend.offload_to_host() {
                    warn!("Failed to move {} model to host memory: {}", style, e);
                }
            }
            backend.release();
            drop(backend);
            loader.reclaim();
        })
        .await;

        if let Err(e) = result {
            error!("Releasing {} model failed: {}", style, e);
        }
    }

    async fn reclaim(&self) {
        let loader = self.loader.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || loader.reclaim()).await {
            warn!("Memory reclaim failed: {}", e);
        }
    }
}

fn load_detail(err: Error) -> String {
    match err {
        Error::Inference(msg) | Error::Config(msg) => msg,
        Error::BackendLoad { detail, .. } => detail,
        other => other.to_string(),
    }
}
