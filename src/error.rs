use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::dao::storage::{ClaimError, StorageError};

/// Message shown when a volunteer loses the race for a game.
pub const ALREADY_CLAIMED_MESSAGE: &str = "someone already signed up for this game";

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Requested game was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Somebody else holds the claim on the game.
    #[error("someone already signed up for this game")]
    AlreadyClaimed,
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Manager PIN missing or wrong.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ClaimError> for ServiceError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::NotFound(id) => ServiceError::NotFound(format!("game `{id}` not found")),
            ClaimError::AlreadyClaimed(_) => ServiceError::AlreadyClaimed,
            ClaimError::IncompleteClaim => {
                ServiceError::InvalidInput(ClaimError::IncompleteClaim.to_string())
            }
            ClaimError::Backend(source) => ServiceError::Unavailable(source),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("{0}")]
    BadRequest(String),
    /// Missing or wrong manager PIN.
    #[error("{0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("{0}")]
    Conflict(String),
    /// Storage unavailable.
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::AlreadyClaimed => AppError::Conflict(ALREADY_CLAIMED_MESSAGE.into()),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
        }
    }
}

impl AppError {
    /// HTTP status the error is rendered with.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
