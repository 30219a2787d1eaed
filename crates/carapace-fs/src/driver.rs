//! Composing rotated log segments into one stream.
//!
//! [`logs_impl`] repeatedly selects the closest segment, tails it, and
//! advances to the next index, waiting for rotation when tailing at the
//! head. Picking the next file means: list the log directory, choose
//! the segment closest to the desired index, open it at the resolved
//! offset, and if it was rotated out from under us, list again.

use std::sync::Arc;

use carapace_allocdir::AllocDirFs;
use carapace_proto::{LogKind, Origin, StreamFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::StreamConfig;
use crate::error::{FsError, Result};
use crate::framer::StreamFramer;
use crate::index::{find_closest, log_indexes};
use crate::tailer::{closed_eof_cancel, stream_file, EofCancel};

/// Task log files live under this allocation-relative directory.
pub(crate) const LOG_DIR: &str = "alloc/logs";

/// Returns the allocation-relative path of one log segment.
pub(crate) fn segment_path(task: &str, log_type: LogKind, idx: i64) -> String {
    format!("{LOG_DIR}/{task}.{log_type}.{idx}")
}

/// Streams the logs of `(task, log_type)` into `frames`.
///
/// With `follow` the stream keeps waiting for new bytes and new
/// segments; without it the stream ends once the newest segment present
/// at each iteration has been drained.
///
/// # Errors
///
/// Returns listing and selection failures, and tailer failures other
/// than rotated-away segments (recovered locally) and peer closure
/// (a clean exit).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn logs_impl(
    ctx: &CancellationToken,
    follow: bool,
    offset: i64,
    origin: Origin,
    task: &str,
    log_type: LogKind,
    fs: Arc<dyn AllocDirFs>,
    frames: mpsc::Sender<StreamFrame>,
    config: &StreamConfig,
) -> Result<()> {
    let framer = StreamFramer::new(
        frames,
        config.heartbeat_interval,
        config.batch_window,
        config.max_frame_size,
    );
    framer.run();

    let result = drive_segments(ctx, follow, offset, origin, task, log_type, &fs, &framer, config).await;
    framer.destroy().await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn drive_segments(
    ctx: &CancellationToken,
    follow: bool,
    offset: i64,
    origin: Origin,
    task: &str,
    log_type: LogKind,
    fs: &Arc<dyn AllocDirFs>,
    framer: &StreamFramer,
    config: &StreamConfig,
) -> Result<()> {
    let (mut next_idx, mut offset) = match origin {
        Origin::Start => (0, offset),
        Origin::End => (i64::MAX, -offset),
    };

    loop {
        let entries = fs.list(LOG_DIR)?;

        // Without follow, the newest index present now bounds the read.
        let max_index = if follow {
            i64::MAX
        } else {
            find_closest(&entries, i64::MAX, 0, task, log_type)?.1
        };

        let (entry, idx, open_offset) = find_closest(&entries, next_idx, offset, task, log_type)?;

        let mut exit_after = false;
        let eof_cancel: EofCancel = if !follow && idx > max_index {
            // Past what was there when we started this pass.
            return Ok(());
        } else if !follow && idx == max_index {
            exit_after = true;
            closed_eof_cancel()
        } else {
            block_until_next_log(ctx, Arc::clone(fs), task, log_type, idx + 1, config)
        };

        let path = format!("{LOG_DIR}/{}", entry.name);
        let result = stream_file(
            ctx,
            open_offset,
            &path,
            0,
            fs.as_ref(),
            framer,
            Some(eof_cancel),
            config,
        )
        .await;

        if ctx.is_cancelled() {
            return Ok(());
        }

        if let Err(err) = result {
            if err.is_not_found() {
                debug!(task, %log_type, segment = idx, "log segment rotated away, relisting");
                continue;
            }
            if matches!(err, FsError::BrokenPipe) {
                return Ok(());
            }
            return Err(FsError::Stream {
                path,
                source: Box::new(err),
            });
        }

        if exit_after {
            return Ok(());
        }

        // A stopped framer here means the session is tearing down;
        // looping again would spin against a dead channel.
        if framer.is_exited() {
            return Ok(());
        }

        offset = 0;
        next_idx = idx + 1;
    }
}

/// Returns a channel that fires once a segment with index
/// `≥ next_index` exists.
///
/// Two detectors race: the filesystem's own existence watch on the
/// exact next path, and a periodic re-listing that catches segments
/// rotating in faster than single-file watches can observe. Cancelling
/// `ctx` delivers `Ok(())`.
fn block_until_next_log(
    ctx: &CancellationToken,
    fs: Arc<dyn AllocDirFs>,
    task: &str,
    log_type: LogKind,
    next_index: i64,
    config: &StreamConfig,
) -> EofCancel {
    let (tx, rx) = mpsc::channel(1);
    let next_path = segment_path(task, log_type, next_index);
    let mut exists_rx = fs.block_until_exists(ctx, &next_path);

    let ctx = ctx.clone();
    let task = task.to_string();
    let check_interval = config.next_log_check;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = ctx.cancelled() => {
                    let _ = tx.send(Ok(())).await;
                    return;
                }
                exists = exists_rx.recv() => {
                    let verdict = match exists {
                        Some(Ok(())) | None => Ok(()),
                        Some(Err(e)) => Err(e.into()),
                    };
                    let _ = tx.send(verdict).await;
                    return;
                }
                _ = ticker.tick() => {
                    let entries = match fs.list(LOG_DIR) {
                        Ok(entries) => entries,
                        Err(e) => {
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                    };
                    match log_indexes(&entries, &task, log_type) {
                        Ok(tuples) => {
                            if tuples.iter().any(|t| t.idx >= next_index) {
                                let _ = tx.send(Ok(())).await;
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        }
    });

    rx
}
