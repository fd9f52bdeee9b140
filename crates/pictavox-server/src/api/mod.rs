//! API routes and handlers

mod cleanup;
mod client;
mod generate;
mod health;
mod images;
mod status;
mod transcribe;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Room for multipart framing and base64 expansion around the audio limit.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the main API router
pub fn create_router(state: AppState, cors_enabled: bool) -> Router {
    let audio_limit = state.engine.config().max_audio_size_bytes();
    let body_limit = audio_limit
        .saturating_mul(4)
        .saturating_div(3)
        .saturating_add(BODY_OVERHEAD_BYTES);

    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/status", get(status::get_status))
        .route("/generate-image", post(generate::generate_image))
        .route("/transcribe", post(transcribe::transcribe))
        .route("/cleanup", post(cleanup::cleanup))
        .route("/images/:filename", get(images::serve_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
