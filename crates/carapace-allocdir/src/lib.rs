//! # carapace-allocdir
//!
//! The allocation-directory capability consumed by the streaming core.
//!
//! This crate provides:
//!
//! - [`AllocDirFs`] — Trait over an allocation's directory tree: listing,
//!   stat, positioned reads, and file-change notifications
//! - [`ChangeEvents`] — Modification/truncation/deletion channels for one
//!   watched file
//! - [`LocalAllocDir`] — A local-filesystem implementation whose watch
//!   layer falls back to stat polling
//! - [`AllocDirError`] — Error type for directory operations
//!
//! Watch methods hand back channels instead of long-lived futures so
//! every wait composes with a caller's cancellation scope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fs;
pub mod local;

pub use error::{AllocDirError, Result};
pub use fs::{AllocDirFs, ChangeEvents, FileReader};
pub use local::{LocalAllocDir, WatchConfig};
