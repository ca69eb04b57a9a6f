//! Error types for the execution backends.

use thiserror::Error;

/// Backend operation result type.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors surfaced by a statement execution backend.
///
/// The store's own message is carried verbatim so callers can report it
/// without reinterpretation.
#[derive(Error, Debug)]
pub enum BackendError {
    /// SQLx error (connection, prepare, constraint, ...)
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The statement did not finish within the allotted time.
    #[error("Statement timed out after {0} ms")]
    Timeout(u64),

    /// Error reported by a non-SQLx backend.
    #[error("Database error: {0}")]
    Database(String),

    /// Unsupported database URL or backend.
    #[error("Backend not available: {0}")]
    NotAvailable(String),
}

impl BackendError {
    /// Create a database error from a backend message.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}
