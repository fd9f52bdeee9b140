//! Python worker bridge for diffusion and whisper inference.
//!
//! Each loaded style owns one long-lived worker process running
//! `scripts/diffusion_worker.py`; the transcriber owns one running
//! `scripts/whisper_worker.py`. Requests and responses are single JSON lines
//! on the worker's stdin/stdout. The first line a worker prints is its ready
//! (or error) report.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, info, warn};

use crate::backends::{
    BackendLoader, DeviceKind, ImageBackend, ImageBytes, InferenceParams, Transcriber,
    TranscriberLoader, Transcription,
};
use crate::catalog::StyleKey;
use crate::config::EngineConfig;
use crate::error::{Error, Result};

const DIFFUSION_SCRIPT: &str = "diffusion_worker.py";
const WHISPER_SCRIPT: &str = "whisper_worker.py";

/// Settings shared by every worker the bridge spawns.
#[derive(Debug, Clone)]
pub struct PythonBridgeConfig {
    pub python_cmd: String,
    pub scripts_dir: PathBuf,
    pub models_dir: PathBuf,
    pub whisper_model: String,
}

impl PythonBridgeConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            python_cmd: config.python_cmd.clone(),
            scripts_dir: config.scripts_dir.clone(),
            models_dir: config.models_dir.clone(),
            whisper_model: config.whisper_model.clone(),
        }
    }
}

/// Request line sent to a worker
#[derive(Debug, Default, Serialize)]
struct WorkerRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_path: Option<String>,
}

/// Response line read from a worker
#[derive(Debug, Default, Deserialize)]
struct WorkerResponse {
    status: Option<String>,
    error: Option<String>,
    device: Option<String>,
    image_base64: Option<String>,
    text: Option<String>,
    language: Option<String>,
    /// `torch.cuda.memory_allocated()` after the request, in megabytes.
    memory_allocated_mb: Option<f64>,
    #[serde(default)]
    segments: Vec<WorkerSegment>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerSegment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

impl WorkerResponse {
    fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(Error::Inference(err)),
            None => Ok(self),
        }
    }
}

/// One running worker process and its pipes.
struct Worker {
    name: String,
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    /// Spawn a worker and wait for its ready line.
    fn spawn(
        config: &PythonBridgeConfig,
        script: &str,
        name: String,
        args: &[String],
    ) -> Result<(Self, WorkerResponse)> {
        let script_path = config.scripts_dir.join(script);
        if !script_path.exists() {
            return Err(Error::Inference(format!(
                "Worker script not found: {}",
                script_path.display()
            )));
        }

        info!("Starting worker {} ({})", name, script_path.display());

        let mut child = Command::new(&config.python_cmd)
            .arg(&script_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Inference(format!("Failed to start {}: {}", name, e)))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Inference(format!("{} has no stdio pipes", name)));
            }
        };

        let mut worker = Self {
            name,
            child: Arc::new(Mutex::new(child)),
            stdin,
            stdout: BufReader::new(stdout),
        };

        match worker.read_response().and_then(WorkerResponse::into_result) {
            Ok(ready) => {
                debug!("Worker {} ready: {:?}", worker.name, ready.status);
                Ok((worker, ready))
            }
            Err(e) => {
                worker.kill();
                Err(e)
            }
        }
    }

    fn call(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerResponse> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| Error::Inference(format!("Failed to serialize request: {}", e)))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| Error::Inference(format!("Failed to write to {}: {}", self.name, e)))?;

        self.read_response()
    }

    fn read_response(&mut self) -> Result<WorkerResponse> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| Error::Inference(format!("Failed to read from {}: {}", self.name, e)))?;
        if read == 0 {
            return Err(Error::Inference(format!("{} exited unexpectedly", self.name)));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            Error::Inference(format!(
                "Failed to parse {} response: {} - {}",
                self.name,
                e,
                line.trim()
            ))
        })
    }

    /// Ask the worker to exit, then make sure it has.
    fn shutdown(mut self) {
        let request = WorkerRequest {
            command: "shutdown",
            ..Default::default()
        };
        if let Err(e) = self.call(&request) {
            debug!("Worker {} did not acknowledge shutdown: {}", self.name, e);
        }
        self.kill();
    }

    fn kill(&mut self) {
        kill_child(&self.child);
    }
}

fn kill_child(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _ = child.kill();
    let _ = child.wait();
}

fn lock_worker(slot: &Mutex<Option<Worker>>) -> MutexGuard<'_, Option<Worker>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spawns one diffusion worker per style.
pub struct PythonDiffusionLoader {
    config: PythonBridgeConfig,
}

impl PythonDiffusionLoader {
    pub fn new(config: PythonBridgeConfig) -> Self {
        Self { config }
    }
}

impl BackendLoader for PythonDiffusionLoader {
    fn load(&self, style: StyleKey) -> Result<Box<dyn ImageBackend>> {
        let profile = style.profile();
        let model_dir = self.config.models_dir.join(profile.model_dir);
        if !model_dir.exists() {
            return Err(Error::Inference(format!(
                "Model directory not found: {}",
                model_dir.display()
            )));
        }

        let args = vec![
            "--model-dir".to_string(),
            model_dir.to_string_lossy().to_string(),
            "--model-ref".to_string(),
            profile.model_ref.to_string(),
        ];
        let (worker, ready) = Worker::spawn(
            &self.config,
            DIFFUSION_SCRIPT,
            format!("diffusion worker [{style}]"),
            &args,
        )?;

        let device = ready
            .device
            .as_deref()
            .map(DeviceKind::parse)
            .unwrap_or(DeviceKind::Cpu);
        info!("{} backend loaded on {}", style, device);

        Ok(Box::new(PythonDiffusionBackend {
            style,
            child: worker.child.clone(),
            state: Mutex::new(Some(worker)),
            device: Mutex::new(device),
            accelerator_mb: Mutex::new(ready.memory_allocated_mb),
        }))
    }
}

/// A diffusion pipeline living in a worker process.
pub struct PythonDiffusionBackend {
    style: StyleKey,
    state: Mutex<Option<Worker>>,
    /// Lets `release` stop a worker that is stuck mid-request.
    child: Arc<Mutex<Child>>,
    device: Mutex<DeviceKind>,
    /// Last figure the worker reported; kept outside `state` so it can be
    /// read while a request is in flight.
    accelerator_mb: Mutex<Option<f64>>,
}

impl PythonDiffusionBackend {
    fn record_memory(&self, response: &WorkerResponse) {
        *self
            .accelerator_mb
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = response.memory_allocated_mb;
    }
}

impl ImageBackend for PythonDiffusionBackend {
    fn style(&self) -> StyleKey {
        self.style
    }

    fn device(&self) -> DeviceKind {
        *self
            .device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn infer(&self, prompt: &str, params: &InferenceParams) -> Result<ImageBytes> {
        let mut guard = lock_worker(&self.state);
        let worker = guard
            .as_mut()
            .ok_or_else(|| Error::Inference(format!("{} backend was released", self.style)))?;

        let request = WorkerRequest {
            command: "generate",
            prompt: Some(prompt),
            negative_prompt: Some(&params.negative_prompt),
            steps: Some(params.steps),
            guidance_scale: Some(params.guidance_scale),
            width: Some(params.width),
            height: Some(params.height),
            ..Default::default()
        };
        let response = worker.call(&request)?.into_result()?;
        self.record_memory(&response);

        let encoded = response
            .image_base64
            .ok_or_else(|| Error::Inference("No image in worker response".to_string()))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Inference(format!("Failed to decode image: {}", e)))?;

        Ok(ImageBytes::png(data))
    }

    fn offload_to_host(&self) -> Result<()> {
        let mut guard = lock_worker(&self.state);
        let Some(worker) = guard.as_mut() else {
            return Ok(());
        };

        let request = WorkerRequest {
            command: "offload",
            ..Default::default()
        };
        let response = worker.call(&request)?.into_result()?;
        self.record_memory(&response);
        let device = response
            .device
            .as_deref()
            .map(DeviceKind::parse)
            .unwrap_or(DeviceKind::Cpu);
        *self
            .device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = device;
        Ok(())
    }

    fn release(&self) {
        let worker = match self.state.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => {
                // A request is in flight; killing the process closes its
                // stdout and unblocks the reader.
                warn!("{} backend busy during release, killing worker", self.style);
                kill_child(&self.child);
                return;
            }
        };
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }

    fn accelerator_memory_mb(&self) -> Option<f64> {
        *self
            .accelerator_mb
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PythonDiffusionBackend {
    fn drop(&mut self) {
        if let Some(mut worker) = lock_worker(&self.state).take() {
            debug!("Stopping {} worker on drop", self.style);
            worker.kill();
        }
    }
}

/// Starts the whisper worker.
pub struct PythonTranscriberLoader {
    config: PythonBridgeConfig,
}

impl PythonTranscriberLoader {
    pub fn new(config: PythonBridgeConfig) -> Self {
        Self { config }
    }
}

impl TranscriberLoader for PythonTranscriberLoader {
    fn load(&self) -> Result<Box<dyn Transcriber>> {
        info!("Loading Whisper model: {}", self.config.whisper_model);
        let args = vec!["--model".to_string(), self.config.whisper_model.clone()];
        let (worker, _ready) = Worker::spawn(
            &self.config,
            WHISPER_SCRIPT,
            "whisper worker".to_string(),
            &args,
        )?;
        info!("Whisper model loaded successfully");
        Ok(Box::new(PythonTranscriber {
            worker: Mutex::new(Some(worker)),
        }))
    }
}

/// Whisper running in a worker process.
pub struct PythonTranscriber {
    worker: Mutex<Option<Worker>>,
}

impl Transcriber for PythonTranscriber {
    fn transcribe(&self, audio: &[u8], format: &str) -> Result<Transcription> {
        // Whisper decodes through ffmpeg, which wants a real file with the
        // right extension.
        let mut file = tempfile::Builder::new()
            .prefix("pictavox-audio-")
            .suffix(&format!(".{format}"))
            .tempfile()?;
        file.write_all(audio)?;
        file.flush()?;

        let mut guard = lock_worker(&self.worker);
        let worker = guard
            .as_mut()
            .ok_or_else(|| Error::Inference("Transcriber was shut down".to_string()))?;

        let request = WorkerRequest {
            command: "transcribe",
            audio_path: Some(file.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let response = worker.call(&request)?.into_result()?;

        Ok(Transcription {
            text: response.text.unwrap_or_default().trim().to_string(),
            confidence: mean_logprob(&response.segments),
            language: response.language.unwrap_or_else(|| "en".to_string()),
            duration_secs: None,
        })
    }
}

impl Drop for PythonTranscriber {
    fn drop(&mut self) {
        if let Some(worker) = lock_worker(&self.worker).take() {
            worker.shutdown();
        }
    }
}

fn mean_logprob(segments: &[WorkerSegment]) -> f64 {
    if segments.is_empty() {
        return 0.0;
    }
    let total: f64 = segments.iter().map(|s| s.avg_logprob.unwrap_or(0.0)).sum();
    total / segments.len() as f64
}
