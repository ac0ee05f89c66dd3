//! Error types for MailGuard

use crate::types::MessageStatus;
use thiserror::Error;

/// Main error type for MailGuard
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Transition conflict: expected status {expected}, found {actual}")]
    TransitionConflict {
        expected: MessageStatus,
        actual: MessageStatus,
    },

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MailGuard
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a failed scan job should be retried with backoff.
    ///
    /// Transition conflicts are resolved by re-reading state, and
    /// aggregation errors are deterministic, so neither benefits from
    /// a retry. Infrastructure and database errors may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Infrastructure(_) | Error::Database(_) | Error::Other(_))
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Aggregation(_) => "AGGREGATION_ERROR",
            Error::TransitionConflict { .. } => "TRANSITION_CONFLICT",
            Error::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
