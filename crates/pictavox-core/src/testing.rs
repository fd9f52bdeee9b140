//! In-process fakes for the backend capabilities, shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backends::{
    BackendLoader, DeviceKind, ImageBackend, ImageBytes, InferenceParams, Transcriber,
    TranscriberLoader, Transcription,
};
use crate::catalog::StyleKey;
use crate::error::{Error, Result};

pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

fn record(events: &EventLog, event: String) {
    events.lock().unwrap().push(event);
}

pub(crate) struct FakeBackend {
    style: StyleKey,
    device: DeviceKind,
    events: EventLog,
    infer_delay: Duration,
    infer_error: Option<String>,
    accelerator_mb: Option<f64>,
}

impl ImageBackend for FakeBackend {
    fn style(&self) -> StyleKey {
        self.style
    }

    fn device(&self) -> DeviceKind {
        self.device
    }

    fn infer(&self, prompt: &str, _params: &InferenceParams) -> Result<ImageBytes> {
        record(&self.events, format!("infer:{}:{}", self.style, prompt));
        if !self.infer_delay.is_zero() {
            std::thread::sleep(self.infer_delay);
        }
        match &self.infer_error {
            Some(msg) => Err(Error::Inference(msg.clone())),
            None => Ok(ImageBytes::png(b"\x89PNG fake".to_vec())),
        }
    }

    fn offload_to_host(&self) -> Result<()> {
        record(&self.events, format!("offload:{}", self.style));
        Ok(())
    }

    fn release(&self) {
        record(&self.events, format!("release:{}", self.style));
    }

    fn accelerator_memory_mb(&self) -> Option<f64> {
        self.accelerator_mb
    }
}

/// Loader that records every call and can be told to fail per style.
pub(crate) struct FakeLoader {
    events: EventLog,
    device: DeviceKind,
    loads: AtomicUsize,
    failing: Mutex<HashSet<StyleKey>>,
    infer_delay: Mutex<Duration>,
    infer_error: Mutex<Option<String>>,
    accelerator_mb: Mutex<Option<f64>>,
}

impl FakeLoader {
    pub(crate) fn new() -> Self {
        Self::on_device(DeviceKind::Cpu)
    }

    pub(crate) fn on_device(device: DeviceKind) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            device,
            loads: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            infer_delay: Mutex::new(Duration::ZERO),
            infer_error: Mutex::new(None),
            accelerator_mb: Mutex::new(None),
        }
    }

    pub(crate) fn fail(&self, style: StyleKey) {
        self.failing.lock().unwrap().insert(style);
    }

    pub(crate) fn heal(&self, style: StyleKey) {
        self.failing.lock().unwrap().remove(&style);
    }

    /// Applies to backends loaded after the call.
    pub(crate) fn set_infer_delay(&self, delay: Duration) {
        *self.infer_delay.lock().unwrap() = delay;
    }

    /// Applies to backends loaded after the call.
    pub(crate) fn set_infer_error(&self, msg: Option<&str>) {
        *self.infer_error.lock().unwrap() = msg.map(str::to_string);
    }

    /// Applies to backends loaded after the call.
    pub(crate) fn set_accelerator_mb(&self, mb: Option<f64>) {
        *self.accelerator_mb.lock().unwrap() = mb;
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl BackendLoader for FakeLoader {
    fn load(&self, style: StyleKey) -> Result<Box<dyn ImageBackend>> {
        record(&self.events, format!("load:{style}"));
        if self.failing.lock().unwrap().contains(&style) {
            return Err(Error::Inference("CUDA out of memory".to_string()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBackend {
            style,
            device: self.device,
            events: self.events.clone(),
            infer_delay: *self.infer_delay.lock().unwrap(),
            infer_error: self.infer_error.lock().unwrap().clone(),
            accelerator_mb: *self.accelerator_mb.lock().unwrap(),
        }))
    }

    fn reclaim(&self) {
        record(&self.events, "reclaim".to_string());
    }
}

pub(crate) struct FakeTranscriber;

impl Transcriber for FakeTranscriber {
    fn transcribe(&self, audio: &[u8], format: &str) -> Result<Transcription> {
        Ok(Transcription {
            text: format!("{} bytes of {}", audio.len(), format),
            confidence: -0.25,
            language: "en".to_string(),
            duration_secs: None,
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeTranscriberLoader {
    pub(crate) loads: AtomicUsize,
}

impl TranscriberLoader for FakeTranscriberLoader {
    fn load(&self) -> Result<Box<dyn Transcriber>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTranscriber))
    }
}
