//! Local-filesystem implementation of the allocation directory.
//!
//! The watch layer is stat polling: portable, and the delivery contract
//! (modified/truncated/deleted in causal order) only needs the poller to
//! observe metadata, not inotify.

use std::fs;
use std::io::{Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use carapace_proto::AllocFileInfo;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{AllocDirError, Result};
use crate::fs::{AllocDirFs, ChangeEvents, FileReader};

/// Configuration for the polling watch layer.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// How often watched paths are stat'ed.
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// An allocation directory rooted at a local path.
#[derive(Debug, Clone)]
pub struct LocalAllocDir {
    root: PathBuf,
    watch: WatchConfig,
}

impl LocalAllocDir {
    /// Creates a view rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watch: WatchConfig::default(),
        }
    }

    /// Sets the watch configuration.
    #[must_use]
    pub fn with_watch_config(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Returns the allocation root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a request path against the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(AllocDirError::PathEscapes(path.to_string()));
                }
            }
        }
        // A leading slash addresses the allocation root, not the host root.
        let rel = rel.strip_prefix("/").unwrap_or(rel);
        Ok(self.root.join(rel))
    }

    fn file_info(name: String, md: &fs::Metadata) -> AllocFileInfo {
        let mod_time: DateTime<Utc> = md
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .into();
        AllocFileInfo {
            name,
            is_dir: md.is_dir(),
            size: if md.is_dir() { 0 } else { md.len() as i64 },
            file_mode: mode_string(md),
            mod_time,
        }
    }
}

impl AllocDirFs for LocalAllocDir {
    fn list(&self, path: &str) -> Result<Vec<AllocFileInfo>> {
        let dir = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let md = entry.metadata()?;
            entries.push(Self::file_info(
                entry.file_name().to_string_lossy().into_owned(),
                &md,
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn stat(&self, path: &str) -> Result<AllocFileInfo> {
        let target = self.resolve(path)?;
        let md = fs::metadata(&target)?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::file_info(name, &md))
    }

    fn read_at(&self, path: &str, offset: i64) -> Result<FileReader> {
        let target = self.resolve(path)?;
        let mut file = fs::File::open(target)?;
        file.seek(SeekFrom::Start(offset.max(0) as u64))?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    fn change_events(
        &self,
        ctx: &CancellationToken,
        path: &str,
        cur_offset: i64,
    ) -> Result<ChangeEvents> {
        let target = self.resolve(path)?;
        let ctx = ctx.clone();
        let poll = self.watch.poll_interval;

        let (modified_tx, modified) = mpsc::channel(1);
        let (deleted_tx, deleted) = mpsc::channel(1);
        let (truncated_tx, truncated) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut last_size = cur_offset;
            let mut last_mtime: Option<SystemTime> = None;
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = ctx.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                match fs::metadata(&target) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        trace!(path = %target.display(), "watched file deleted");
                        let _ = deleted_tx.send(()).await;
                        return;
                    }
                    Err(_) => {
                        // Transient stat failure; retry on the next tick.
                    }
                    Ok(md) => {
                        let size = md.len() as i64;
                        let mtime = md.modified().ok();
                        if size < last_size {
                            last_size = size;
                            last_mtime = mtime;
                            if truncated_tx.send(()).await.is_err() {
                                return;
                            }
                        } else if size > last_size
                            || (mtime.is_some() && last_mtime.is_some() && mtime != last_mtime)
                        {
                            last_size = size;
                            last_mtime = mtime;
                            // Coalesce: a pending notification already covers this.
                            let _ = modified_tx.try_send(());
                        } else {
                            last_mtime = mtime;
                        }
                    }
                }
            }
        });

        Ok(ChangeEvents {
            modified,
            deleted,
            truncated,
        })
    }

    fn block_until_exists(
        &self,
        ctx: &CancellationToken,
        path: &str,
    ) -> mpsc::Receiver<Result<()>> {
        let (tx, rx) = mpsc::channel(1);
        let resolved = self.resolve(path);
        let ctx = ctx.clone();
        let poll = self.watch.poll_interval;

        tokio::spawn(async move {
            let target = match resolved {
                Ok(t) => t,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = ctx.cancelled() => {
                        let _ = tx.send(Ok(())).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        if target.exists() {
                            let _ = tx.send(Ok(())).await;
                            return;
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Renders a Unix-style mode string, e.g. `"-rw-r--r--"`.
fn mode_string(md: &fs::Metadata) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = md.permissions().mode();
        let mut s = String::with_capacity(10);
        s.push(if md.is_dir() { 'd' } else { '-' });
        for shift in [6u32, 3, 0] {
            let bits = (mode >> shift) & 0o7;
            s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        s
    }
    #[cfg(not(unix))]
    {
        let _ = md;
        String::new()
    }
}
