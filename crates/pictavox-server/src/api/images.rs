//! Generated image download

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn serve_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .engine
        .resolve_image(&filename)
        .ok_or_else(|| ApiError::not_found(format!("Image not found: {filename}")))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found(format!("Image not found: {filename}")))?;

    Ok(([(header::CONTENT_TYPE, content_type(&filename))], bytes))
}

fn content_type(filename: &str) -> &'static str {
    let lowered = filename.to_ascii_lowercase();
    if lowered.ends_with(".jpg") || lowered.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}
