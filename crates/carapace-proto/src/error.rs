//! Error types for wire codec operations.

use thiserror::Error;

/// Errors that can occur when encoding or decoding wire records.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Serializing a record failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Deserializing a record failed.
    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
