//! Error types for the import core

use pmodatabase::DatabaseError;

/// Result type alias for import core operations
pub type Result<T> = std::result::Result<T, ContentError>;

/// Errors that can occur in the import core
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// Bad path, unknown enum value, out-of-range index
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Database object with given id or path absent when required
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate autoscan location, duplicate timer identity, overlap
    #[error("conflict: {0}")]
    Conflict(String),

    /// Filesystem failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Error surfaced by the database collaborator
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The task observed its invalidation flag and returned early
    #[error("task cancelled")]
    Cancelled,

    /// The process is terminating
    #[error("server shutting down")]
    ShuttingDown,

    /// Generic error (HTTP fetch, XML parse...)
    #[error("{0}")]
    Other(String),
}

impl ContentError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Silent errors abort a task without being reported as failures.
    pub fn is_silent(&self) -> bool {
        matches!(self, ContentError::Cancelled | ContentError::ShuttingDown)
    }
}
