//! Engine status snapshot

use axum::{extract::State, Json};
use pictavox_core::{EngineStatus, SpeechService};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server_status: &'static str,
    #[serde(flatten)]
    pub engine: EngineStatus,
    pub supported_audio_formats: &'static [&'static str],
    pub timestamp: String,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        server_status: "running",
        engine: state.engine.status().await,
        supported_audio_formats: SpeechService::supported_formats(),
        timestamp: chrono::Local::now().to_rfc3339(),
    })
}
