//! File metadata records and the synchronous response records that
//! carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Metadata for one entry of an allocation directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocFileInfo {
    /// Entry name, relative to the listed directory.
    pub name: String,

    /// True when the entry is a directory.
    pub is_dir: bool,

    /// Size in bytes. Zero for directories.
    pub size: i64,

    /// Unix-style mode string, e.g. `"-rw-r--r--"`.
    #[serde(default)]
    pub file_mode: String,

    /// Last modification time.
    pub mod_time: DateTime<Utc>,
}

/// Response record for the synchronous directory listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsListResponse {
    /// Entries of the listed directory.
    #[serde(default)]
    pub files: Vec<AllocFileInfo>,
}

/// Response record for the synchronous file stat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStatResponse {
    /// Metadata of the stat'ed path.
    pub info: AllocFileInfo,
}

impl FsListResponse {
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

impl FsStatResponse {
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
