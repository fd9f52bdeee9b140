//! Speech-to-text endpoint

use std::time::Instant;

use axum::{
    extract::{Multipart, Request, State},
    http::StatusCode,
    Json, RequestExt,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_AUDIO_FORMAT: &str = "wav";

/// JSON transcription request
#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub audio_base64: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub success: bool,
    pub text: String,
    pub confidence: f64,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f32>,
    pub processing_time_ms: f64,
}

struct AudioUpload {
    data: Vec<u8>,
    format: String,
}

pub async fn transcribe(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let upload = parse_upload(req).await?;
    info!(
        "Transcription request: {} bytes of {}",
        upload.data.len(),
        upload.format
    );

    let start = Instant::now();
    let result = state
        .engine
        .transcribe(upload.data, &upload.format)
        .await
        .map_err(|e| ApiError::from_core(e, state.debug))?;

    Ok(Json(TranscribeResponse {
        success: true,
        text: result.text,
        confidence: result.confidence,
        language: result.language,
        duration_secs: result.duration_secs,
        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn parse_upload(req: Request) -> Result<AudioUpload, ApiError> {
    let content_type = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(payload) = req
            .extract::<Json<TranscribeRequest>, _>()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {e}")))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.audio_base64.trim())
            .map_err(|e| ApiError::bad_request(format!("Invalid base64 audio: {e}")))?;
        return Ok(AudioUpload {
            data,
            format: payload
                .format
                .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
        });
    }

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = req
            .extract::<Multipart, _>()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed reading multipart field: {e}")))?
        {
            if field.name() != Some("audio") {
                continue;
            }
            let format = field
                .file_name()
                .and_then(format_from_filename)
                .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string());
            let bytes = field.bytes().await.map_err(|e| {
                ApiError::bad_request(format!("Failed reading multipart 'audio' field: {e}"))
            })?;
            return Ok(AudioUpload {
                data: bytes.to_vec(),
                format,
            });
        }

        return Err(ApiError::bad_request(
            "Missing audio input in multipart request (expected 'audio' file field)",
        ));
    }

    Err(ApiError {
        status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
        message: "Expected request with `Content-Type: application/json` or `multipart/form-data`"
            .to_string(),
        retry_after: None,
    })
}

fn format_from_filename(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    let extension = extension.trim().to_ascii_lowercase();
    (!extension.is_empty()).then_some(extension)
}
