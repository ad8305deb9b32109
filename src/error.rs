//! Error taxonomy (spec.md §7)
//!
//! Grounded on the teacher's `db::DbError` (`thiserror`, `#[from]`
//! conversions), generalized across the store/agent/HTTP boundary and
//! given an `IntoResponse` impl the way the teacher's handlers map
//! errors to `(StatusCode, Json<ErrorResponse>)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("child process exited: {0}")]
    ChildExited(String),
    #[error("internal error: {0}")]
    Internal(String),
    /// Present for taxonomy completeness (spec.md §7) and for tests
    /// asserting §8 property 5; never returned by a handler — the
    /// store recovers a corrupted conversation file into `NotFound`
    /// before this boundary (see DESIGN.md Open Question 1-adjacent
    /// note on corruption handling).
    #[error("corrupted file (recovered): {0}")]
    CorruptedFile(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::ChildExited(_) => "CHILD_EXITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::CorruptedFile(_) => "CORRUPTED_FILE",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ChildExited(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::CorruptedFile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound(s) => ApiError::NotFound(s),
            crate::store::StoreError::Conflict(s) => ApiError::Conflict(s),
            crate::store::StoreError::Io(e) => ApiError::Storage(e.to_string()),
            crate::store::StoreError::Serde(e) => ApiError::Storage(e.to_string()),
        }
    }
}

impl From<crate::agent::RuntimeError> for ApiError {
    fn from(e: crate::agent::RuntimeError) -> Self {
        match e {
            crate::agent::RuntimeError::NotRunning => {
                ApiError::Validation("agent is not running".into())
            }
            crate::agent::RuntimeError::AlreadyRunning => {
                ApiError::Conflict("agent is already running in this mode".into())
            }
            crate::agent::RuntimeError::Spawn(s) => ApiError::Internal(s),
            crate::agent::RuntimeError::Store(e) => e.into(),
        }
    }
}
