//! # carapace-fs
//!
//! The allocation file and log streaming core of the carapace agent.
//!
//! This crate provides:
//!
//! - [`FileSystemEndpoint`] — Per-connection orchestration of the four
//!   file-system operations (list, stat, file stream, log stream)
//! - [`StreamFramer`] / [`FrameReceiver`] — Size-, time-, and
//!   heartbeat-driven frame batching over a bounded channel
//! - [`StreamConfig`] — Wire-visible tunables (heartbeat 1 s, batch
//!   window 200 ms, 64 KiB frames, channel capacity 32)
//! - [`AllocCatalog`] / [`TokenResolver`] — Capability seams to the
//!   node's allocation state and ACL system
//! - [`FsError`] — Session errors with HTTP-style codes
//!
//! A streaming session is one cancellation scope over a producer (file
//! tailer or rotated-log driver), the framer timers, and a peer-closure
//! watcher, multiplexed onto the wire by the session's serve loop.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acl;
pub mod catalog;
pub mod config;
pub mod error;
pub mod framer;
mod driver;
mod index;
mod session;
mod tailer;

pub use acl::{AclDisabled, AclSnapshot, Capability, TokenResolver};
pub use catalog::{AllocCatalog, AllocInfo, TaskState};
pub use config::StreamConfig;
pub use error::{map_transport_err, FsError, Result};
pub use framer::{frame_channel, FrameReceiver, StreamFramer};
pub use session::{FileSystemEndpoint, LOGS_METHOD, STREAM_METHOD};
