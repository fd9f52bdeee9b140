//! Text-to-image generation endpoint

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use pictavox_core::{parse_style_key, GenerationRequest, GenerationResult, StyleKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::client::client_id;
use crate::error::ApiError;
use crate::state::AppState;

/// Generation request body. `prompt` stays untyped so non-string prompts
/// get a validation error instead of a deserialization one.
#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: GenerationResult,
    /// Path relative to the server root where the image can be fetched.
    pub image_path: String,
    pub timestamp: String,
}

pub async fn generate_image(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {e}")))?;
    let client = client_id(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_forwarded_for,
    );

    let prompt = extract_prompt(body.prompt)?;
    let style = parse_style(body.style.as_deref())?;

    info!("Image generation request from {}", client);

    let mut request = GenerationRequest::new(prompt, client);
    if let Some(style) = style {
        request = request.with_style(style);
    }

    let result = state
        .engine
        .generate(request)
        .await
        .map_err(|e| ApiError::from_core(e, state.debug))?;

    Ok(Json(GenerateImageResponse {
        success: true,
        image_path: format!("images/{}", result.filename),
        result,
        timestamp: chrono::Local::now().to_rfc3339(),
    }))
}

fn extract_prompt(prompt: Option<Value>) -> Result<String, ApiError> {
    match prompt {
        Some(Value::String(text)) => Ok(text),
        Some(_) => Err(ApiError::bad_request("Invalid input: Prompt must be a string")),
        None => Err(ApiError::bad_request("Invalid input: Prompt is required")),
    }
}

fn parse_style(style: Option<&str>) -> Result<Option<StyleKey>, ApiError> {
    match style.map(str::trim).filter(|s| !s.is_empty() && *s != "auto") {
        Some(raw) => parse_style_key(raw)
            .map(Some)
            .map_err(|e| ApiError::bad_request(format!("Invalid input: {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn non_string_prompt_is_a_validation_error() {
        let err = extract_prompt(Some(json!(42))).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(extract_prompt(None).is_err());
        assert_eq!(
            extract_prompt(Some(json!("a fox"))).unwrap(),
            "a fox".to_string()
        );
    }

    #[test]
    fn style_is_optional() {
        assert_eq!(parse_style(None).unwrap(), None);
        assert_eq!(parse_style(Some("auto")).unwrap(), None);
        assert_eq!(
            parse_style(Some("realistic_vision")).unwrap(),
            Some(StyleKey::RealisticVision)
        );
        assert!(parse_style(Some("watercolor")).is_err());
    }
}
