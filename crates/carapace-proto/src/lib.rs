//! # carapace-proto
//!
//! Wire records for the carapace allocation file-streaming protocol.
//!
//! This crate provides:
//!
//! - [`StreamFrame`] — The smallest unit delivered to a streaming client
//! - [`StreamResponse`] / [`RpcError`] — Response records with HTTP-style codes
//! - [`FsStreamRequest`] / [`FsLogsRequest`] — Streaming request records
//! - [`FsListRequest`] / [`FsStatRequest`] — Synchronous request records
//! - [`AllocFileInfo`] — File metadata carried by listings and stats
//! - [`Origin`] / [`LogKind`] — Validated request parameters
//!
//! Records travel as JSON; every record carries `to_json`/`from_json`
//! helpers that map codec failures into [`ProtoError`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod file_info;
pub mod frame;
pub mod request;

pub use error::ProtoError;
pub use file_info::{AllocFileInfo, FsListResponse, FsStatResponse};
pub use frame::{RpcError, StreamFrame, StreamResponse};
pub use request::{
    FsListRequest, FsLogsRequest, FsStatRequest, FsStreamRequest, LogKind, Origin,
};
