//! Stream frame and response records.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// The smallest unit delivered to a streaming client.
///
/// A frame carries a chunk of file data, an optional file event
/// (deletion or truncation), and the absolute file offset reached after
/// the payload. A frame with empty data and no event is a heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFrame {
    /// Path of the file the frame belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,

    /// File event tag, empty for plain data frames.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_event: String,

    /// Raw payload bytes, possibly empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,

    /// Absolute file offset reached after the payload.
    #[serde(default)]
    pub offset: i64,
}

impl StreamFrame {
    /// Event tag sent when the streamed file is deleted.
    pub const DELETE_EVENT: &'static str = "file deleted";

    /// Event tag sent when the streamed file is truncated.
    pub const TRUNCATE_EVENT: &'static str = "file truncated";

    /// Creates a data frame.
    #[must_use]
    pub fn data(file: impl Into<String>, data: Vec<u8>, offset: i64) -> Self {
        Self {
            file: file.into(),
            file_event: String::new(),
            data,
            offset,
        }
    }

    /// Creates an event frame.
    #[must_use]
    pub fn event(
        file: impl Into<String>,
        event: impl Into<String>,
        data: Vec<u8>,
        offset: i64,
    ) -> Self {
        Self {
            file: file.into(),
            file_event: event.into(),
            data,
            offset,
        }
    }

    /// Creates a heartbeat frame for the given position.
    #[must_use]
    pub fn heartbeat(file: impl Into<String>, offset: i64) -> Self {
        Self {
            file: file.into(),
            file_event: String::new(),
            data: Vec::new(),
            offset,
        }
    }

    /// Returns true if this frame carries no data and no event.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.data.is_empty() && self.file_event.is_empty()
    }

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

/// An error carried on the wire, with an optional HTTP-style code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Human-readable error message.
    pub message: String,

    /// HTTP-style status code, when one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl RpcError {
    /// Creates a new wire error.
    #[must_use]
    pub fn new(message: impl Into<String>, code: Option<i64>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

/// One response record on a streaming connection.
///
/// Either a payload (raw bytes in plain-text mode, a JSON-encoded
/// [`StreamFrame`] otherwise) or a trailing error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamResponse {
    /// Response payload bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,

    /// Terminal error, present on the last record of a failed stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl StreamResponse {
    /// Creates a payload response.
    #[must_use]
    pub fn payload(payload: Vec<u8>) -> Self {
        Self {
            payload,
            error: None,
        }
    }

    /// Creates a trailing error response.
    #[must_use]
    pub fn error(message: impl Into<String>, code: Option<i64>) -> Self {
        Self {
            payload: Vec::new(),
            error: Some(RpcError::new(message, code)),
        }
    }

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
