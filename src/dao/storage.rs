use std::error::Error;
use thiserror::Error;

use crate::dao::models::GameId;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be reached or failed the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What the store was doing when it failed.
        message: String,
        /// Underlying driver error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Result alias for claim store operations.
pub type ClaimResult<T> = Result<T, ClaimError>;

/// Failures reported by [`ClaimStore`](crate::dao::claim_store::ClaimStore) operations.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// No game carries the requested identifier.
    #[error("game `{0}` not found")]
    NotFound(GameId),
    /// Somebody already volunteered for the game.
    #[error("game `{0}` is already claimed")]
    AlreadyClaimed(GameId),
    /// The claim leaves the parent or the children blank.
    #[error("a claim must name both the parent and the children")]
    IncompleteClaim,
    /// The backend could not be reached or rejected the request.
    #[error(transparent)]
    Backend(#[from] StorageError),
}
