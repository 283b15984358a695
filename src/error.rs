//! Error types for glycal

use thiserror::Error;

/// Errors raised by a repository backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(
        "Concurrent calibration update for user {user_id}: expected {expected:?} observations, found {found:?}"
    )]
    Conflict {
        user_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
}

/// Errors that can occur while updating a calibration
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Review {0} has already been applied to the calibration")]
    AlreadyApplied(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
