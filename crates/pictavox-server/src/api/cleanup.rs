//! Manual resource cleanup

use axum::{extract::State, Json};
use pictavox_core::CleanupReport;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(flatten)]
    pub report: CleanupReport,
}

pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, ApiError> {
    let report = state
        .engine
        .cleanup()
        .await
        .map_err(|e| ApiError::from_core(e, state.debug))?;

    Ok(Json(CleanupResponse {
        success: true,
        message: "Cleanup completed",
        report,
    }))
}
