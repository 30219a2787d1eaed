//! Error types for allocation-directory operations.

use thiserror::Error;

/// Errors that can occur when accessing an allocation directory.
#[derive(Debug, Error)]
pub enum AllocDirError {
    /// The path escapes the allocation directory.
    #[error("path escapes allocation directory: {0}")]
    PathEscapes(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AllocDirError {
    /// Returns true when the underlying cause is a missing file.
    ///
    /// The streaming core uses this to tell a rotated-away log segment
    /// apart from a real failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type alias for allocation-directory operations.
pub type Result<T> = std::result::Result<T, AllocDirError>;
