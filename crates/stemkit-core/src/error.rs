//! Error types for engine, task and pipeline operations

use thiserror::Error;

/// Error codes surfaced across the C boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InvalidArgument = 1,
    NotFound = 2,
    Runtime = 3,
    Unsupported = 4,
    Cancelled = 5,
}

/// Errors returned synchronously by registry and supervisor operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StemkitError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Runtime(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Cancelled(String),
}

impl StemkitError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Runtime(_) => ErrorCode::Runtime,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::Cancelled(_) => ErrorCode::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, StemkitError>;

/// Failure reported by a pipeline stage or an external engine
///
/// Engines report cancellation with the `Cancelled` variant rather than a
/// message, so the orchestrator never has to match on error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Unsupported(String),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(e.to_string())
    }
}
