//! # Error Handling
//!
//! `AppError` is the error type every HTTP handler returns. Component errors
//! (`AudioError`, `SessionError`, `ProviderError`) convert into it with `?`,
//! and `ResponseError` turns it into a JSON body:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "conflict",
//!     "message": "Session is busy processing a previous recording",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::audio::session::SessionError;
use crate::audio::AudioError;
use crate::providers::ProviderError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal / ConfigError / Io**: server-side problems (500)
/// - **BadRequest / ValidationError / InvalidAudio**: client sent bad data (400)
/// - **NotFound**: unknown session or missing artifact (404)
/// - **Conflict**: the session is in the wrong state for the request (409)
/// - **TooManySessions**: concurrent session limit reached (429)
/// - **Upstream**: a speech or chat provider failed (502)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    InvalidAudio(String),
    Conflict(String),
    TooManySessions(String),
    Upstream(String),
    Io(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::InvalidAudio(msg) => write!(f, "Invalid audio: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::TooManySessions(msg) => write!(f, "Too many sessions: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream service error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
            AppError::InvalidAudio(msg) => (StatusCode::BAD_REQUEST, "invalid_audio", msg.as_str()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.as_str()),
            AppError::TooManySessions(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "too_many_sessions", msg.as_str())
            }
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.as_str()),
            AppError::Io(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", msg.as_str()),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so 400 not 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<AudioError> for AppError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::InvalidAudio(msg) => AppError::InvalidAudio(msg),
            AudioError::Io(e) => AppError::Io(e.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTransition { .. } | SessionError::Busy => {
                AppError::Conflict(err.to_string())
            }
            SessionError::LimitReached(_) => AppError::TooManySessions(err.to_string()),
            SessionError::DuplicateId(_) => AppError::Conflict(err.to_string()),
            SessionError::InvalidId(_) => AppError::ValidationError(err.to_string()),
            SessionError::Audio(audio) => audio.into(),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
