//! Speech-to-text with a lazily loaded transcriber.

use std::io::Cursor;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backends::{Transcriber, TranscriberLoader, Transcription};
use crate::error::{Error, Result};

/// Container formats the transcriber accepts.
pub const SUPPORTED_AUDIO_FORMATS: &[&str] = &["wav", "mp3", "m4a", "ogg", "flac", "aac"];

pub struct SpeechService {
    loader: Arc<dyn TranscriberLoader>,
    transcriber: OnceCell<Arc<dyn Transcriber>>,
    max_audio_bytes: usize,
}

impl SpeechService {
    pub fn new(loader: Arc<dyn TranscriberLoader>, max_audio_bytes: usize) -> Self {
        Self {
            loader,
            transcriber: OnceCell::new(),
            max_audio_bytes,
        }
    }

    pub fn supported_formats() -> &'static [&'static str] {
        SUPPORTED_AUDIO_FORMATS
    }

    pub fn is_loaded(&self) -> bool {
        self.transcriber.initialized()
    }

    /// Check size and format; returns the normalized format name.
    pub fn validate(&self, audio: &[u8], format: &str) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::Validation("Audio data is empty".to_string()));
        }
        if audio.len() > self.max_audio_bytes {
            return Err(Error::Validation(format!(
                "Audio too large: {} bytes (max {} bytes)",
                audio.len(),
                self.max_audio_bytes
            )));
        }

        let format = format.trim().trim_start_matches('.').to_ascii_lowercase();
        if !SUPPORTED_AUDIO_FORMATS.contains(&format.as_str()) {
            return Err(Error::Validation(format!(
                "Unsupported audio format '{}', expected one of: {}",
                format,
                SUPPORTED_AUDIO_FORMATS.join(", ")
            )));
        }
        Ok(format)
    }

    pub async fn transcribe(&self, audio: Vec<u8>, format: &str) -> Result<Transcription> {
        let format = self.validate(&audio, format)?;
        let transcriber = self.transcriber().await?;

        let duration = if format == "wav" {
            wav_duration_secs(&audio)
        } else {
            None
        };

        debug!("Transcribing {} bytes of {}", audio.len(), format);
        let mut transcription =
            tokio::task::spawn_blocking(move || transcriber.transcribe(&audio, &format))
                .await
                .map_err(|e| Error::Inference(format!("Transcription task failed: {}", e)))??;

        if transcription.duration_secs.is_none() {
            transcription.duration_secs = duration;
        }
        info!("Transcription successful: {} chars", transcription.text.len());
        Ok(transcription)
    }

    async fn transcriber(&self) -> Result<Arc<dyn Transcriber>> {
        let transcriber = self
            .transcriber
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let loaded = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|result| result.map_err(|e| e.to_string()));
                match loaded {
                    Ok(transcriber) => Ok(Arc::from(transcriber)),
                    Err(detail) => Err(Error::BackendLoad {
                        model: "whisper".to_string(),
                        detail,
                    }),
                }
            })
            .await?;
        Ok(transcriber.clone())
    }
}

/// Duration of a WAV clip from its header, if it parses.
pub fn wav_duration_secs(audio: &[u8]) -> Option<f32> {
    let reader = hound::WavReader::new(Cursor::new(audio)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f32 / spec.sample_rate as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTranscriberLoader;
    use std::sync::atomic::Ordering;

    fn wav_bytes(seconds: u32, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..seconds * sample_rate {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn rejects_empty_oversized_and_unknown_audio() {
        let service = SpeechService::new(Arc::new(FakeTranscriberLoader::default()), 4);

        assert!(matches!(
            service.validate(&[], "wav"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.validate(&[0; 5], "wav"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.validate(&[0; 3], "exe"),
            Err(Error::Validation(_))
        ));
        assert_eq!(service.validate(&[0; 3], ".MP3").unwrap(), "mp3");
    }

    #[tokio::test]
    async fn transcriber_loads_once() {
        let loader = Arc::new(FakeTranscriberLoader::default());
        let service = SpeechService::new(loader.clone(), 1024);
        assert!(!service.is_loaded());

        let first = service.transcribe(vec![1, 2, 3], "mp3").await.unwrap();
        service.transcribe(vec![1, 2], "ogg").await.unwrap();

        assert_eq!(first.text, "3 bytes of mp3");
        assert!(first.duration_secs.is_none());
        assert!(service.is_loaded());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wav_input_reports_duration() {
        let service = SpeechService::new(Arc::new(FakeTranscriberLoader::default()), 1 << 20);
        let transcription = service.transcribe(wav_bytes(2, 8000), "wav").await.unwrap();
        let duration = transcription.duration_secs.unwrap();
        assert!((duration - 2.0).abs() < 1e-3);
    }

    #[test]
    fn garbage_wav_has_no_duration() {
        assert!(wav_duration_secs(b"not a wav file").is_none());
    }
}
