//! Error taxonomy for the detection intake core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectError>;

/// Failures returned by the registry, the admitter and the trigger
#[derive(Error, Debug)]
pub enum DetectError {
    /// Bad or missing request field
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid file extension: '{0}'")]
    InvalidExtension(String),

    #[error("Invalid camera id: {0}")]
    InvalidCamera(i64),

    /// Unknown session, or a session owned by someone else
    #[error("No detection with id {0}")]
    SessionNotFound(i64),

    #[error("Image path already exists: {0}")]
    DuplicatePath(String),

    /// Directory or file I/O failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used when reporting a failure to a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    StorageUnavailable,
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectError::Validation(_) | DetectError::InvalidExtension(_) => {
                ErrorKind::Validation
            }
            DetectError::DuplicatePath(_) => ErrorKind::Conflict,
            DetectError::InvalidCamera(_) | DetectError::SessionNotFound(_) => {
                ErrorKind::NotFound
            }
            DetectError::StorageUnavailable(_)
            | DetectError::Database(_)
            | DetectError::Internal(_) => ErrorKind::StorageUnavailable,
        }
    }

    pub(crate) fn storage(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        DetectError::StorageUnavailable(format!("{}: {}", context, err))
    }
}
