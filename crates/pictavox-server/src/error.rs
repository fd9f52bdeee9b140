//! API error handling

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pictavox_core::Error;
use serde_json::json;
use tracing::error;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Map a core error, hiding internal detail unless `debug` is set.
    pub fn from_core(err: Error, debug: bool) -> Self {
        let detail = err.to_string();
        let hidden = |public: &str| {
            if debug {
                err.to_string()
            } else {
                public.to_string()
            }
        };

        match &err {
            Error::Validation(_) => Self::bad_request(detail),
            Error::RateLimited { retry_after } => Self {
                retry_after: Some(*retry_after),
                ..Self::new(StatusCode::TOO_MANY_REQUESTS, detail)
            },
            Error::GenerationInProgress => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "Image generation already in progress. Please wait.",
            ),
            Error::ResourceExhausted { .. } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                hidden("Server memory usage too high. Please try again later."),
            ),
            Error::BackendLoad { .. } => {
                error!("Backend load failure: {}", detail);
                Self::internal(hidden("Model loading issue. Please try again."))
            }
            Error::Timeout(_) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                hidden("Image generation timed out. Please try again."),
            ),
            Error::Inference(_) | Error::Config(_) | Error::Io(_) => {
                error!("Request failed: {}", detail);
                Self::internal(hidden("Internal server error"))
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::NOT_FOUND => "not_found_error",
            StatusCode::TOO_MANY_REQUESTS => "rate_limit_error",
            StatusCode::SERVICE_UNAVAILABLE => "overloaded_error",
            StatusCode::GATEWAY_TIMEOUT => "timeout_error",
            _ => "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_secs = self.retry_after.map(retry_after_secs);
        let mut error = json!({
            "message": self.message,
            "type": self.error_type(),
            "code": self.status.as_str(),
        });
        if let Some(secs) = retry_secs {
            error["retry_after_seconds"] = json!(secs);
        }

        let mut response = (self.status, Json(json!({ "error": error }))).into_response();
        if let Some(secs) = retry_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::from_core(err, false)
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}
