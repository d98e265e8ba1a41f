use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{dao::storage::StorageError, songs::SongSourceError, transport::TransportError};

/// Errors that can occur in session controller operations.
///
/// None of these are fatal to the process; the worst user-visible outcome is
/// a retryable failure surfaced by the UI layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The transport channel was not connected when a send was attempted.
    #[error("not connected to the game channel")]
    NotConnected,
    /// A join confirmation did not arrive within the allotted window.
    #[error("timed out waiting for join confirmation")]
    Timeout,
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A snapshot could not be serialized for persistence or broadcast.
    #[error("snapshot serialization failed")]
    Serialization(#[from] serde_json::Error),
    /// Device-local blob persistence failed.
    #[error("storage failure")]
    Storage(#[from] StorageError),
    /// The external song lookup failed; the caller may retry.
    #[error("song lookup failed")]
    SongSource(#[from] SongSourceError),
}

impl From<TransportError> for ServiceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => ServiceError::NotConnected,
        }
    }
}

/// Application-level errors that are converted to HTTP responses by the relay.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
