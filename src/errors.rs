//! Unified request-scoped error handling for the climate data API.
//!
//! Every failure a handler can produce is one of the variants below; the
//! `IntoResponse` impl maps each to an HTTP status and a small JSON body so
//! the wire format stays consistent across routes. Startup failures use
//! `anyhow` in `main.rs` instead and never reach this type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

// ---

/// Type alias for handler results.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A referenced entity (station, sensor, data type, link, setting,
    /// reading) or anchoring message does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed request input: unparseable timestamp, bad id, empty
    /// selection, unknown unit, and so on.
    #[error("invalid request: {0}")]
    Validation(String),

    /// More than one station-sensor link matches a (station, data type)
    /// pair. This is a configuration fault in the link table; we fail closed
    /// rather than picking one arbitrarily.
    #[error("ambiguous station-sensor link: {0}")]
    AmbiguousLink(String),

    /// An export format value outside the accepted set (`csv`, `xml`).
    #[error("unsupported export format: {0}")]
    BadFormat(String),

    /// Report rendering failed mid-export (CSV/XML encoding).
    #[error("export failed: {0}")]
    Export(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    /// Shorthand for a `NotFound` over a named resource kind.
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound(what.into())
    }
}

// ---

/// JSON error body: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, code, message) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION", self.to_string()),
            ApiError::BadFormat(_) => (StatusCode::BAD_REQUEST, "BAD_FORMAT", self.to_string()),
            ApiError::AmbiguousLink(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AMBIGUOUS_LINK",
                self.to_string(),
            ),
            ApiError::Export(e) => {
                tracing::error!("export error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "EXPORT_ERROR",
                    "report generation failed".to_string(),
                )
            }
            ApiError::Database(e) => {
                // Log the real error; the client gets an opaque message.
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "internal database error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        (status, Json(body)).into_response()
    }
}
