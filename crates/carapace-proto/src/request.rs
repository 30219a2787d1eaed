//! Request records for the file-system endpoints.
//!
//! `origin` and `log_type` travel as plain strings: an unknown value is a
//! validation failure (code 400) answered by the session, not a decode
//! failure (code 500), so the deserializer must accept it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Whether a requested offset is measured from the start or the end of
/// the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
    /// Offset counts forward from the first byte.
    #[default]
    Start,
    /// Offset counts backward from the last byte.
    End,
}

impl Origin {
    /// Parses a request origin string. The empty string defaults to
    /// [`Origin::Start`].
    ///
    /// # Errors
    ///
    /// Returns the value back if it names neither origin.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "" | "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

/// Which task log stream to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// The task's standard output.
    Stdout,
    /// The task's standard error.
    Stderr,
}

impl LogKind {
    /// Parses a request log type string. Unlike [`Origin::parse`] there
    /// is no default; the field is required.
    ///
    /// # Errors
    ///
    /// Returns the value back if it names neither stream.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

macro_rules! json_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to JSON.
            ///
            /// # Errors
            ///
            /// Returns an error if serialization fails.
            pub fn to_json(&self) -> Result<Vec<u8>, ProtoError> {
                serde_json::to_vec(self).map_err(|e| ProtoError::Encoding(e.to_string()))
            }

            /// Deserialize from JSON.
            ///
            /// # Errors
            ///
            /// Returns an error if deserialization fails.
            pub fn from_json(json: &[u8]) -> Result<Self, ProtoError> {
                serde_json::from_slice(json).map_err(|e| ProtoError::Decoding(e.to_string()))
            }
        }
    };
}

/// Request record opening a raw file stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStreamRequest {
    /// Allocation to read from. Required.
    #[serde(default)]
    pub alloc_id: String,

    /// Path within the allocation directory. Required.
    #[serde(default)]
    pub path: String,

    /// Byte offset, interpreted according to `origin`.
    #[serde(default)]
    pub offset: i64,

    /// `"start"`, `"end"`, or `""` (treated as `"start"`).
    #[serde(default)]
    pub origin: String,

    /// Maximum bytes to stream; 0 means unbounded.
    #[serde(default)]
    pub limit: i64,

    /// Keep the stream open past EOF, waiting for new bytes.
    #[serde(default)]
    pub follow: bool,

    /// Deliver raw bytes instead of JSON-framed records.
    #[serde(default)]
    pub plain_text: bool,

    /// Auth token presented by the caller.
    #[serde(default)]
    pub auth_token: String,

    /// Namespace the capability check runs against.
    #[serde(default)]
    pub namespace: String,
}

json_codec!(FsStreamRequest);

/// Request record opening a task log stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsLogsRequest {
    /// Allocation to read from. Required.
    #[serde(default)]
    pub alloc_id: String,

    /// Task whose logs to stream. Required.
    #[serde(default)]
    pub task: String,

    /// `"stdout"` or `"stderr"`. Required.
    #[serde(default)]
    pub log_type: String,

    /// Byte offset, interpreted according to `origin`.
    #[serde(default)]
    pub offset: i64,

    /// `"start"`, `"end"`, or `""` (treated as `"start"`).
    #[serde(default)]
    pub origin: String,

    /// Maximum bytes to stream; 0 means unbounded.
    #[serde(default)]
    pub limit: i64,

    /// Keep the stream open past EOF, following rotations.
    #[serde(default)]
    pub follow: bool,

    /// Deliver raw bytes instead of JSON-framed records.
    #[serde(default)]
    pub plain_text: bool,

    /// Auth token presented by the caller.
    #[serde(default)]
    pub auth_token: String,

    /// Namespace the capability check runs against.
    #[serde(default)]
    pub namespace: String,
}

json_codec!(FsLogsRequest);

/// Request record for the synchronous directory listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsListRequest {
    /// Allocation to list. Required.
    #[serde(default)]
    pub alloc_id: String,

    /// Directory within the allocation directory.
    #[serde(default)]
    pub path: String,

    /// Auth token presented by the caller.
    #[serde(default)]
    pub auth_token: String,

    /// Namespace the capability check runs against.
    #[serde(default)]
    pub namespace: String,
}

json_codec!(FsListRequest);

/// Request record for the synchronous file stat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStatRequest {
    /// Allocation to stat within. Required.
    #[serde(default)]
    pub alloc_id: String,

    /// Path within the allocation directory. Required.
    #[serde(default)]
    pub path: String,

    /// Auth token presented by the caller.
    #[serde(default)]
    pub auth_token: String,

    /// Namespace the capability check runs against.
    #[serde(default)]
    pub namespace: String,
}

json_codec!(FsStatRequest);
