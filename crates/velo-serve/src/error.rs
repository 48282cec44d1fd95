//! Fetch-path error types and their HTTP mappings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use velo_rewrite::RewriteError;

/// Errors surfaced to artifact requests.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The request URL does not decode to a content-addressed name.
    #[error("not a rewritten resource: {0}")]
    NotFound(String),

    /// The build could not finish within the deadline.
    #[error("rebuild timed out: {0}")]
    BuildTimeout(String),

    /// The origin answered with a client error; passed through.
    #[error("origin returned {0}")]
    OriginClientError(u16),

    /// Everything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for fetch-path operations.
pub type Result<T> = std::result::Result<T, ServeError>;

impl From<RewriteError> for ServeError {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::DeadlineExceeded(what) => ServeError::BuildTimeout(what),
            RewriteError::OriginStatus { status, .. } if (400..500).contains(&status) => {
                ServeError::OriginClientError(status)
            }
            // The HTML is the authoritative reference; anything that
            // cannot be rebuilt right now reads as absent.
            other => ServeError::NotFound(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::BuildTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "build_timeout"),
            Self::OriginClientError(code) => (
                StatusCode::from_u16(*code).unwrap_or(StatusCode::NOT_FOUND),
                "origin_error",
            ),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
