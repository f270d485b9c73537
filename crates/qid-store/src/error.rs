//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for qid_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => qid_core::Error::NotFound(msg),
            StoreError::Conflict(msg) => qid_core::Error::Conflict(msg),
            StoreError::Transport(msg) => qid_core::Error::Transport(msg),
        }
    }
}
