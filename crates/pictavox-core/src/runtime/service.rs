//! Runtime service orchestrator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::backends::{
    BackendLoader, PythonBridgeConfig, PythonDiffusionLoader, PythonTranscriberLoader,
    TranscriberLoader, Transcription,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::memory::{MemoryProbe, SysinfoProbe};
use crate::registry::{ModelRegistry, RegistryConfig};
use crate::runtime::coordinator::GenerationCoordinator;
use crate::runtime::speech::SpeechService;
use crate::runtime::types::{CleanupReport, EngineStatus, GenerationRequest, GenerationResult};

/// Main inference engine runtime.
pub struct InferenceEngine {
    config: EngineConfig,
    registry: Arc<ModelRegistry>,
    coordinator: Arc<GenerationCoordinator>,
    speech: SpeechService,
    artifacts: ArtifactStore,
    memory: Arc<dyn MemoryProbe>,
    started_at: Instant,
}

impl InferenceEngine {
    /// Create an engine backed by the Python workers.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let bridge = PythonBridgeConfig::from_engine(&config);
        Self::with_components(
            config,
            Arc::new(PythonDiffusionLoader::new(bridge.clone())),
            Arc::new(PythonTranscriberLoader::new(bridge)),
            Arc::new(SysinfoProbe::new()),
        )
    }

    /// Create an engine from custom backend implementations.
    pub fn with_components(
        config: EngineConfig,
        loader: Arc<dyn BackendLoader>,
        transcriber_loader: Arc<dyn TranscriberLoader>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ModelRegistry::new(
            RegistryConfig::from_engine(&config),
            loader,
        ));
        let artifacts = ArtifactStore::new(&config.images_dir);
        std::fs::create_dir_all(artifacts.dir())?;

        let coordinator = Arc::new(GenerationCoordinator::new(
            &config,
            registry.clone(),
            artifacts.clone(),
            memory.clone(),
        ));
        let speech = SpeechService::new(transcriber_loader, config.max_audio_size_bytes());

        info!(
            "Engine ready: up to {} model(s), images in {}",
            config.max_models_in_memory,
            config.images_dir.display()
        );

        Ok(Self {
            config,
            registry,
            coordinator,
            speech,
            artifacts,
            memory,
            started_at: Instant::now(),
        })
    }

    /// Get runtime configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run a generation on its own task.
    ///
    /// A caller that goes away (for example a disconnected HTTP client) does
    /// not interrupt a model load or inference half way; the generation runs
    /// to completion and keeps the single-flight slot until it does.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move { coordinator.generate(request).await })
            .await
            .map_err(|e| Error::Inference(format!("Generation task failed: {}", e)))?
    }

    pub async fn transcribe(&self, audio: Vec<u8>, format: &str) -> Result<Transcription> {
        self.speech.transcribe(audio, format).await
    }

    /// Path of a generated image, if `filename` names one.
    pub fn resolve_image(&self, filename: &str) -> Option<PathBuf> {
        self.artifacts.resolve(filename)
    }

    pub async fn status(&self) -> EngineStatus {
        let mut memory = self.memory.usage();
        if memory.accelerator_mb.is_none() {
            memory.accelerator_mb = self.registry.accelerator_memory_mb().await;
        }

        EngineStatus {
            memory,
            models_loaded: self.registry.loaded_styles().await,
            is_generating: self.coordinator.is_generating(),
            images_count: self.artifacts.count(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            transcriber_loaded: self.speech.is_loaded(),
        }
    }

    /// Unload every model and apply image retention.
    ///
    /// Refused while a generation is running, since that generation holds
    /// one of the models.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let _slot = self.coordinator.try_hold()?;

        let models_unloaded = self.registry.unload_all().await;

        let store = self.artifacts.clone();
        let max_images = self.config.max_images_to_keep;
        let images_removed = tokio::task::spawn_blocking(move || store.cleanup(max_images))
            .await
            .map_err(|e| Error::Inference(format!("Image cleanup task failed: {}", e)))?;

        let report = CleanupReport {
            models_unloaded,
            images_removed,
            memory_usage_mb: self.memory.usage().rss_mb,
        };
        info!(
            "Cleanup complete: {} model(s) unloaded, {} image(s) removed",
            report.models_unloaded, report.images_removed
        );
        Ok(report)
    }

    /// Release models that have sat unused past the idle timeout.
    ///
    /// Skipped while a generation runs; its model may be older than the
    /// timeout but is still in use.
    pub async fn evict_idle(&self) -> usize {
        match self.coordinator.try_hold() {
            Ok(_slot) => self.registry.evict_idle().await,
            Err(_) => 0,
        }
    }

    /// Release every model before the process exits.
    pub async fn shutdown(&self) {
        let unloaded = self.registry.unload_all().await;
        info!("Engine shut down, {} model(s) unloaded", unloaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StyleKey;
    use crate::memory::FixedProbe;
    use crate::testing::{FakeLoader, FakeTranscriberLoader};
    use std::time::Duration;

    fn engine(dir: &tempfile::TempDir) -> (Arc<InferenceEngine>, Arc<FakeLoader>) {
        let config = EngineConfig {
            images_dir: dir.path().join("images"),
            max_images_to_keep: 2,
            rate_limit_window_secs: 0,
            ..EngineConfig::default()
        };
        let loader = Arc::new(FakeLoader::new());
        let engine = InferenceEngine::with_components(
            config,
            loader.clone(),
            Arc::new(FakeTranscriberLoader::default()),
            Arc::new(FixedProbe::rss_mb(256.0)),
        )
        .unwrap();
        (Arc::new(engine), loader)
    }

    #[tokio::test]
    async fn status_reflects_loaded_models_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _loader) = engine(&dir);

        let status = engine.status().await;
        assert!(status.models_loaded.is_empty());
        assert_eq!(status.images_count, 0);
        assert!(!status.transcriber_loaded);

        engine
            .generate(GenerationRequest::new("a cinematic photo", "ip1"))
            .await
            .unwrap();

        let status = engine.status().await;
        assert_eq!(status.models_loaded, vec![StyleKey::RealisticVision]);
        assert_eq!(status.images_count, 1);
        assert_eq!(status.memory.rss_mb, 256.0);
        assert_eq!(status.memory.accelerator_mb, None);
        assert!(!status.is_generating);
    }

    #[tokio::test]
    async fn status_reports_backend_accelerator_memory() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, loader) = engine(&dir);
        loader.set_accelerator_mb(Some(2150.0));

        engine
            .generate(GenerationRequest::new("a cinematic photo", "ip1"))
            .await
            .unwrap();
        assert_eq!(engine.status().await.memory.accelerator_mb, Some(2150.0));

        engine.cleanup().await.unwrap();
        assert_eq!(engine.status().await.memory.accelerator_mb, None);
    }

    #[tokio::test]
    async fn cleanup_unloads_models() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _loader) = engine(&dir);
        engine
            .generate(GenerationRequest::new("a cinematic photo", "ip1"))
            .await
            .unwrap();

        let report = engine.cleanup().await.unwrap();
        assert_eq!(report.models_unloaded, 1);
        assert_eq!(report.images_removed, 0);
        assert!(engine.status().await.models_loaded.is_empty());
    }

    #[tokio::test]
    async fn cleanup_is_refused_during_generation() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, loader) = engine(&dir);
        loader.set_infer_delay(Duration::from_millis(300));

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .generate(GenerationRequest::new("a cinematic photo", "ip1"))
                    .await
            })
        };
        while !engine.status().await.is_generating {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(matches!(
            engine.cleanup().await,
            Err(Error::GenerationInProgress)
        ));
        running.await.unwrap().unwrap();
        assert!(engine.cleanup().await.is_ok());
    }

    #[tokio::test]
    async fn abandoned_generation_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, loader) = engine(&dir);
        loader.set_infer_delay(Duration::from_millis(300));

        let caller = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .generate(GenerationRequest::new("a cinematic photo", "ip1"))
                    .await
            })
        };
        while !engine.status().await.is_generating {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        caller.abort();
        let _ = caller.await;

        assert!(engine.status().await.is_generating);
        assert!(matches!(
            engine
                .generate(GenerationRequest::new("an anime fantasy", "ip2"))
                .await,
            Err(Error::GenerationInProgress)
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while engine.status().await.is_generating {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let status = engine.status().await;
        assert_eq!(status.images_count, 1);
        assert_eq!(status.models_loaded, vec![StyleKey::RealisticVision]);
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn idle_sweep_keeps_fresh_models() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _loader) = engine(&dir);
        engine
            .generate(GenerationRequest::new("a cinematic photo", "ip1"))
            .await
            .unwrap();

        assert_eq!(engine.evict_idle().await, 0);
        assert_eq!(engine.registry().len().await, 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = EngineConfig {
            max_models_in_memory: 0,
            ..EngineConfig::default()
        };
        let result = InferenceEngine::with_components(
            config,
            Arc::new(FakeLoader::new()),
            Arc::new(FakeTranscriberLoader::default()),
            Arc::new(FixedProbe::default()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
