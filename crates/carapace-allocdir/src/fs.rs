//! The allocation-directory trait and its change-notification channels.

use carapace_proto::AllocFileInfo;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A positioned file reader handed out by [`AllocDirFs::read_at`].
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Change notifications for one watched file.
///
/// Each channel has capacity 1; events are delivered in causal order
/// with respect to the file content visible through [`AllocDirFs`].
/// Senders are dropped when the watch's cancellation scope ends.
#[derive(Debug)]
pub struct ChangeEvents {
    /// Fires when bytes are appended past the watched offset or the
    /// modification time moves.
    pub modified: mpsc::Receiver<()>,

    /// Fires once when the file is removed. The watch ends afterwards.
    pub deleted: mpsc::Receiver<()>,

    /// Fires when the file shrinks below the last observed size.
    pub truncated: mpsc::Receiver<()>,
}

/// Filesystem-like view of one allocation's directory tree.
///
/// Paths are relative to the allocation root. Implementations must not
/// let a path escape the root.
pub trait AllocDirFs: Send + Sync {
    /// Lists the entries of a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list(&self, path: &str) -> Result<Vec<AllocFileInfo>>;

    /// Stats a single path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be stat'ed.
    fn stat(&self, path: &str) -> Result<AllocFileInfo>;

    /// Opens a file for reading at the given byte offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or positioned.
    fn read_at(&self, path: &str, offset: i64) -> Result<FileReader>;

    /// Starts watching a file for changes past `cur_offset`.
    ///
    /// The watch runs until `ctx` is cancelled or the file is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be established.
    fn change_events(
        &self,
        ctx: &CancellationToken,
        path: &str,
        cur_offset: i64,
    ) -> Result<ChangeEvents>;

    /// Returns a channel that receives one value once `path` exists.
    ///
    /// Cancelling `ctx` delivers `Ok(())` so a blocked caller can
    /// observe its scope ending through the same channel.
    fn block_until_exists(
        &self,
        ctx: &CancellationToken,
        path: &str,
    ) -> mpsc::Receiver<Result<()>>;
}
