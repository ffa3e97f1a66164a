//! # Error Handling
//!
//! Custom error types for the voice session protocol and the application
//! store, plus their conversions to HTTP responses and wire error frames.
//!
//! ## Error Categories:
//! - **Protocol errors** (`SessionNotReady`, `EmptyBuffer`,
//!   `TransportClosed`): violations of the per-session state machine. These
//!   surface to the client as an explicit error frame and return the session
//!   to `Idle` — they never tear the connection down.
//! - **Domain errors** (`ApplicationNotFound`, `UnknownTool`,
//!   `ValidationError`): recoverable failures of a tool call. They become
//!   `{success: false, message}` results so the agent can phrase a reply and
//!   the conversation continues.
//! - **Infrastructure errors** (`UpstreamUnavailable`, `Internal`,
//!   `ConfigError`): the pipeline service or the server itself misbehaving.
//!
//! ## Rust Concepts:
//! - **Result<T, E>**: every fallible operation returns `AppResult<T>`
//! - **From trait**: `?` converts foreign errors into `AppError` variants
//! - **ResponseError trait**: maps errors onto HTTP status codes for the
//!   REST endpoints (the WebSocket path uses [`AppError::code`] instead)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error taxonomy.
#[derive(Debug)]
pub enum AppError {
    /// Audio arrived without an established session context
    SessionNotReady(String),

    /// Commit requested with no fragments appended since the last commit
    EmptyBuffer,

    /// A tool call referenced an application that does not exist for this user
    ApplicationNotFound(String),

    /// The agent emitted a function call this server does not implement
    UnknownTool(String),

    /// Malformed input: bad filters, unparseable timestamps, empty fields
    ValidationError(String),

    /// The transcription/agent/synthesis pipeline failed or timed out
    UpstreamUnavailable(String),

    /// The client connection is gone; pending results must be discarded
    TransportClosed,

    /// Internal server errors
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl AppError {
    /// Machine-readable error code, used in WebSocket error frames and in
    /// JSON HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SessionNotReady(_) => "session_not_ready",
            AppError::EmptyBuffer => "empty_buffer",
            AppError::ApplicationNotFound(_) => "application_not_found",
            AppError::UnknownTool(_) => "unknown_tool",
            AppError::ValidationError(_) => "validation_error",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::TransportClosed => "transport_closed",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Whether a tool call hitting this error leaves the conversation
    /// recoverable (the agent gets a failure result and keeps talking).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::ApplicationNotFound(_)
                | AppError::UnknownTool(_)
                | AppError::ValidationError(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::SessionNotReady(msg) => write!(f, "Session not ready: {}", msg),
            AppError::EmptyBuffer => {
                write!(f, "Audio buffer is empty: nothing was appended before commit")
            }
            AppError::ApplicationNotFound(msg) => write!(f, "Application not found: {}", msg),
            AppError::UnknownTool(name) => write!(f, "Unknown tool: {}", name),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            AppError::TransportClosed => write!(f, "Transport closed"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// HTTP mapping for the REST endpoints (health, config).
///
/// Protocol errors never travel this path in practice — they stay on the
/// WebSocket — but the mapping is total so a handler can return any
/// `AppError` without a second error type.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let status = match self {
            AppError::SessionNotReady(_) => StatusCode::CONFLICT,
            AppError::EmptyBuffer => StatusCode::BAD_REQUEST,
            AppError::ApplicationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnknownTool(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::TransportClosed => StatusCode::GONE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.code(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Anyhow errors are internal failures by the time they reach a handler.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON from a client is the client's fault, not the server's.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Pipeline HTTP failures map onto the upstream variant so the session can
/// degrade instead of crash.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
