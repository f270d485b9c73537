//! Error types for QID.

use thiserror::Error;

/// Error kinds surfaced by the service, store and worker layers.
///
/// A runner exiting non-zero is not an `Error`: it is recorded as step
/// output on a failed build and never propagated.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
