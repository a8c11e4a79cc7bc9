use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable code carried by a [`TransportableError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The caller's deadline elapsed before the job reached a terminal state.
    ScrapeTimeout,
    /// The worker gave up on the job.
    ScrapeFailed,
    /// One of the in-page actions failed.
    ScrapeActionError,
    /// The target cannot be handled by any engine.
    UnsupportedUrl,
    /// The job was cancelled before producing a result.
    JobCancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ScrapeTimeout => "SCRAPE_TIMEOUT",
            ErrorCode::ScrapeFailed => "SCRAPE_FAILED",
            ErrorCode::ScrapeActionError => "SCRAPE_ACTION_ERROR",
            ErrorCode::UnsupportedUrl => "UNSUPPORTED_URL",
            ErrorCode::JobCancelled => "JOB_CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure that crosses the core's boundary unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TransportableError {
    pub code: ErrorCode,
    pub message: String,
}

impl TransportableError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(waited_ms: u64) -> Self {
        Self::new(
            ErrorCode::ScrapeTimeout,
            format!("Scrape timed out after waiting {waited_ms}ms"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::JobCancelled, "Job was cancelled")
    }
}

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed submission, rejected before a job exists.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Classified worker-side failure.
    #[error(transparent)]
    Transportable(#[from] TransportableError),

    /// Cancellation attempted on a batch that is already fully terminal.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An optional collaborator (persistence sink, content store) is absent.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Content store error: {0}")]
    ContentStoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Unclassified failure.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Returns true if this error is the caller-side deadline elapsing.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AppError::Transportable(TransportableError {
                code: ErrorCode::ScrapeTimeout,
                ..
            })
        )
    }

    /// Classify an error raised while executing a job.
    ///
    /// Already classified errors pass through verbatim; everything else is
    /// reported as `SCRAPE_FAILED` with the original message.
    pub fn into_transportable(self) -> TransportableError {
        match self {
            AppError::Transportable(e) => e,
            other => TransportableError::new(ErrorCode::ScrapeFailed, other.to_string()),
        }
    }
}
