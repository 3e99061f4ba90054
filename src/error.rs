//! # Error Handling
//!
//! This module defines the application's error types and how they're converted to
//! HTTP responses.
//!
//! ## Two families of errors:
//! - [`AppError`]: anything that fails an HTTP request (config endpoint, a refused
//!   WebSocket upgrade). These become JSON error responses.
//! - [`UpstreamError`]: failures while preparing the upstream STT connection.
//!   These never reach HTTP; a bridge session reports them to its client as a
//!   generic `error` event and then shuts down.
//!
//! Nothing in here is process-fatal. A failing session only ever takes itself down.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **Unavailable**: The bridge is at its session limit (503 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Unavailable("session limit reached".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// No capacity for another bridge session right now
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses that clients can understand.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest → 400 (Bad Request)
/// - Unavailable → 503 (Service Unavailable)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "unavailable",
///     "message": "session limit reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => {
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) => actix_web::http::StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::Unavailable(msg) => ("unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
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

/// Failures while building or opening the upstream STT connection.
#[derive(Debug)]
pub enum UpstreamError {
    /// The session has no credential to authenticate with.
    MissingCredential,

    /// The credential can't be carried in an HTTP header (control characters, etc.)
    InvalidCredential(String),

    /// The configured URL is not a valid WebSocket request target
    InvalidRequest(String),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::MissingCredential => write!(f, "upstream credential is not configured"),
            UpstreamError::InvalidCredential(msg) => write!(f, "invalid upstream credential: {}", msg),
            UpstreamError::InvalidRequest(msg) => write!(f, "invalid upstream request: {}", msg),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<tokio_tungstenite::tungstenite::Error> for UpstreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        UpstreamError::InvalidRequest(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue> for UpstreamError {
    fn from(err: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue) -> Self {
        UpstreamError::InvalidCredential(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Unavailable("full".into()).status_code().as_u16(), 503);
        assert_eq!(AppError::BadRequest("nope".into()).status_code().as_u16(), 400);
        assert_eq!(AppError::ConfigError("bad".into()).status_code().as_u16(), 500);
    }

    #[actix_web::test]
    async fn test_error_response_body() {
        let response = AppError::Unavailable("session limit reached".into()).error_response();
        assert_eq!(response.status().as_u16(), 503);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "unavailable");
        assert_eq!(value["error"]["message"], "session limit reached");
    }

    #[test]
    fn test_upstream_error_display() {
        assert_eq!(
            UpstreamError::MissingCredential.to_string(),
            "upstream credential is not configured"
        );
    }
}
