//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: failures of the HTTP surface, converted into JSON responses
//!   through actix's `ResponseError` trait.
//! - **RelayError**: the relay's own taxonomy. Only leg-level closure or error
//!   ends a session; every other variant is logged and contained to the
//!   message or upgrade attempt that caused it. Nothing is ever retried.
//!
//! ## Why no body on gate rejections:
//! A rejected upgrade is answered with a bare status code, so the gate does not
//! go through `AppError` at all (see `relay::dispatcher`).

use crate::audio::codec::TranscodeError;
use crate::audio::frame::FrameError;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent something that is not a valid request (400 errors)
/// - **ServiceUnavailable**: The relay is at capacity (503 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// No room for another session right now
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "WebSocket handshake failed",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ServiceUnavailable(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::CapacityExceeded(_) => AppError::ServiceUnavailable(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Which side of a session an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Telephony media stream
    Downstream,
    /// Realtime AI socket
    Upstream,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Downstream => write!(f, "downstream"),
            Leg::Upstream => write!(f, "upstream"),
        }
    }
}

/// Relay error taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Missing or wrong credential at upgrade (terminal for the attempt)
    AuthRejected,

    /// Upgrade path is not a known route (terminal for the attempt)
    RouteNotFound(String),

    /// Too many live sessions (terminal for the attempt)
    CapacityExceeded(usize),

    /// Upstream leg failed to open or timed out (terminal for the session)
    UpstreamConnectFailure(String),

    /// A message did not match its schema (message dropped)
    MessageParseFailure { leg: Leg, detail: String },

    /// An audio payload could not be converted (frame dropped)
    TranscodeFailure(String),

    /// A leg closed (ends the session)
    PeerClosed(Leg),

    /// A leg reported a transport error (ends the session)
    PeerError { leg: Leg, detail: String },
}

impl RelayError {
    /// Whether this error tears the whole session down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamConnectFailure(_) | RelayError::PeerClosed(_) | RelayError::PeerError { .. }
        )
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::AuthRejected => write!(f, "Upgrade rejected: invalid credential"),
            RelayError::RouteNotFound(path) => write!(f, "Upgrade rejected: unknown route {}", path),
            RelayError::CapacityExceeded(max) => write!(f, "Upgrade rejected: {} sessions already active", max),
            RelayError::UpstreamConnectFailure(msg) => write!(f, "Upstream connect failed: {}", msg),
            RelayError::MessageParseFailure { leg, detail } => {
                write!(f, "Malformed {} message: {}", leg, detail)
            }
            RelayError::TranscodeFailure(msg) => write!(f, "Transcode failed: {}", msg),
            RelayError::PeerClosed(leg) => write!(f, "The {} leg closed", leg),
            RelayError::PeerError { leg, detail } => write!(f, "The {} leg failed: {}", leg, detail),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<TranscodeError> for RelayError {
    fn from(err: TranscodeError) -> Self {
        RelayError::TranscodeFailure(err.to_string())
    }
}

impl From<FrameError> for RelayError {
    fn from(err: FrameError) -> Self {
        RelayError::TranscodeFailure(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::UpstreamConnectFailure(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
