//! Error types for the streaming core.

use carapace_allocdir::AllocDirError;
use carapace_proto::ProtoError;
use thiserror::Error;

/// Errors that can occur while serving a file-system session.
#[derive(Debug, Error)]
pub enum FsError {
    /// The request named no allocation.
    #[error("must provide a valid alloc id")]
    AllocIdRequired,

    /// The request named no path.
    #[error("must provide a file path")]
    PathRequired,

    /// The request named no task.
    #[error("must provide task name")]
    TaskRequired,

    /// The request named no log type, or an unknown one.
    #[error("must provide log type (stdout/stderr)")]
    LogTypeRequired,

    /// The request origin was neither `start` nor `end`.
    #[error("origin must be start or end")]
    InvalidOrigin,

    /// Raw streaming was requested for a directory.
    #[error("file {0:?} is a directory")]
    IsDirectory(String),

    /// The allocation does not run a task with the given name.
    #[error("allocation does not have task with name {0:?}")]
    UnknownTask(String),

    /// The task has never started, so it has no logs.
    #[error("task {0:?} not started yet. No logs available")]
    TaskNotStarted(String),

    /// The node does not know this allocation.
    #[error("unknown allocation {0:?}")]
    UnknownAllocation(String),

    /// The token is valid but lacks the needed capability.
    #[error("permission denied")]
    PermissionDenied,

    /// No rotated segment exists for the requested task/log type.
    #[error("log entry for task {task:?} and log type {log_type:?} not found")]
    LogEntryNotFound {
        /// Task whose logs were requested.
        task: String,
        /// Requested log type.
        log_type: String,
    },

    /// A file shares the log-name prefix but its suffix is not an index.
    #[error("failed to convert {0:?} to a log index")]
    InvalidLogIndex(String),

    /// Streaming one segment failed.
    #[error("failed to stream {path:?}: {source}")]
    Stream {
        /// Segment path that failed.
        path: String,
        /// Underlying failure.
        #[source]
        source: Box<FsError>,
    },

    /// A frame was sent after the framer was destroyed.
    #[error("frame stream closed")]
    FramerClosed,

    /// The remote peer closed or reset the connection. Sessions exit
    /// cleanly on this; it is never written to the wire.
    #[error("connection was broken by the peer")]
    BrokenPipe,

    /// Allocation-directory access failed.
    #[error(transparent)]
    AllocDir(#[from] AllocDirError),

    /// Wire codec failure.
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// The HTTP-style code written with a trailing error record.
    ///
    /// Permission and broken-pipe errors carry no code; the former is
    /// written without one and the latter is never written at all.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::AllocIdRequired
            | Self::PathRequired
            | Self::TaskRequired
            | Self::LogTypeRequired
            | Self::InvalidOrigin
            | Self::IsDirectory(_)
            | Self::UnknownTask(_) => Some(400),
            Self::UnknownAllocation(_) | Self::TaskNotStarted(_) => Some(404),
            Self::PermissionDenied | Self::BrokenPipe => None,
            _ => Some(500),
        }
    }

    /// Returns true when the underlying cause is a missing file.
    ///
    /// The log driver uses this to recover from a segment rotated away
    /// mid-read.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::AllocDir(e) => e.is_not_found(),
            Self::Stream { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Result type alias for streaming operations.
pub type Result<T> = std::result::Result<T, FsError>;

/// Remaps transport-closure errors to the [`FsError::BrokenPipe`]
/// sentinel.
///
/// Structured identity (`io::ErrorKind`) is preferred; the substring
/// match exists for the platform texts that surface with no portable
/// error value, notably the Windows "forcibly closed" variant.
#[must_use]
pub fn map_transport_err(err: FsError) -> FsError {
    if let FsError::Io(e) = &err {
        if matches!(
            e.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
        ) {
            return FsError::BrokenPipe;
        }
    }

    let msg = err.to_string();
    if msg.contains("closed pipe")
        || msg.contains("broken pipe")
        || msg.contains("connection reset")
        || msg.contains("forcibly closed")
    {
        return FsError::BrokenPipe;
    }

    err
}
