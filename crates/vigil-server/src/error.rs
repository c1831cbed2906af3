use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use vigil_core::error::VigilError;

/// Server error type that maps to HTTP status codes.
#[derive(Debug)]
pub enum ServerError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        tracing::error!(status = %status, error = %message);
        (status, message).into_response()
    }
}

impl From<VigilError> for ServerError {
    fn from(e: VigilError) -> Self {
        match e {
            VigilError::RepoNotFound(_)
            | VigilError::NoSuchJob(_)
            | VigilError::RecordNotFound { .. }
            | VigilError::SnapshotNotFound(_) => Self::NotFound(e.to_string()),
            VigilError::InvalidArgument(_) | VigilError::UnsupportedBackend(_) => {
                Self::BadRequest(e.to_string())
            }
            VigilError::Locked(_)
            | VigilError::BackupRunning { .. }
            | VigilError::DuplicatePolicy { .. } => Self::Conflict(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}
