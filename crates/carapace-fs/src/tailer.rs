//! Tailing a single file into the framer.
//!
//! [`stream_file`] reads from a given offset, reacts to
//! modification/truncation/deletion notifications while parked at EOF,
//! and honors an external EOF-cancel channel so a caller can bound the
//! stream at "whatever is there right now".

use carapace_allocdir::AllocDirFs;
use carapace_proto::StreamFrame;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::StreamConfig;
use crate::error::{map_transport_err, FsError, Result};
use crate::framer::StreamFramer;

/// Channel used to cancel a tailer that is parked at EOF.
///
/// A value delivers a verdict (`Ok` ends the stream cleanly, `Err`
/// propagates); a channel whose senders are all gone reads as "closed"
/// and also ends the stream cleanly.
pub(crate) type EofCancel = mpsc::Receiver<Result<()>>;

/// Returns an already-closed [`EofCancel`], making the tailer exit at
/// its first EOF.
pub(crate) fn closed_eof_cancel() -> EofCancel {
    let (_, rx) = mpsc::channel(1);
    rx
}

/// Streams `path` from `offset` into `framer` until a terminal
/// condition.
///
/// With `limit > 0` at most that many bytes are read in total, and a
/// truncation mid-stream preserves the *remaining* allowance rather
/// than refreshing it. `eof_cancel` is only consulted while parked at
/// EOF; `None` means the tailer never gives up there.
///
/// # Errors
///
/// Returns read failures and framer failures; transport-closure texts
/// are remapped to [`FsError::BrokenPipe`].
pub(crate) async fn stream_file(
    ctx: &CancellationToken,
    mut offset: i64,
    path: &str,
    limit: i64,
    fs: &dyn AllocDirFs,
    framer: &StreamFramer,
    mut eof_cancel: Option<EofCancel>,
    config: &StreamConfig,
) -> Result<()> {
    let mut file = fs.read_at(path, offset)?;
    let mut remaining = (limit > 0).then_some(limit);

    // Heartbeats advertise the position even before the first byte.
    framer.set_position(path, offset).await;

    // Scope for the change watcher; torn down with this call.
    let watch_ctx = ctx.child_token();
    let _watch_guard = watch_ctx.clone().drop_guard();

    let framer_exit = framer.exit_handle();
    let mut changes = None;
    let mut last_event = String::new();

    let buf_size = match remaining {
        Some(r) if (r as usize) < config.max_frame_size => r as usize,
        _ => config.max_frame_size,
    };
    let mut buf = vec![0u8; buf_size.max(1)];

    'outer: loop {
        let want = match remaining {
            Some(r) => buf.len().min(r as usize),
            None => buf.len(),
        };
        let n = if want == 0 {
            0
        } else {
            file.read(&mut buf[..want]).await.map_err(FsError::Io)?
        };

        offset += n as i64;
        if let Some(r) = remaining.as_mut() {
            *r -= n as i64;
        }

        if n > 0 || !last_event.is_empty() {
            framer
                .send(path, &last_event, &buf[..n], offset)
                .await
                .map_err(map_transport_err)?;
            last_event.clear();
        }

        // More bytes may be waiting; skip the watcher while data flows.
        if n > 0 {
            continue;
        }

        if changes.is_none() {
            changes = Some(fs.change_events(&watch_ctx, path, offset)?);
        }
        let events = changes.as_mut().expect("change watcher registered above");

        loop {
            tokio::select! {
                modified = events.modified.recv() => {
                    match modified {
                        Some(()) => continue 'outer,
                        None => return Ok(()),
                    }
                }
                deleted = events.deleted.recv() => {
                    match deleted {
                        Some(()) => {
                            trace!(path, "streamed file deleted");
                            return framer
                                .send(path, StreamFrame::DELETE_EVENT, &[], offset)
                                .await
                                .map_err(map_transport_err);
                        }
                        None => return Ok(()),
                    }
                }
                truncated = events.truncated.recv() => {
                    match truncated {
                        Some(()) => {
                            trace!(path, "streamed file truncated, reopening");
                            offset = 0;
                            file = fs.read_at(path, offset)?;
                            last_event = StreamFrame::TRUNCATE_EVENT.to_string();
                            continue 'outer;
                        }
                        None => return Ok(()),
                    }
                }
                () = framer_exit.cancelled() => return Ok(()),
                () = ctx.cancelled() => return Ok(()),
                verdict = recv_eof_cancel(&mut eof_cancel) => {
                    return match verdict {
                        None => Ok(()),
                        Some(v) => v,
                    };
                }
            }
        }
    }
}

/// Waits on the EOF-cancel channel, or forever when there is none.
async fn recv_eof_cancel(eof_cancel: &mut Option<EofCancel>) -> Option<Result<()>> {
    match eof_cancel.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::{frame_channel, FrameReceiver};
    use carapace_allocdir::{LocalAllocDir, WatchConfig};
    use std::fs;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> StreamConfig {
        StreamConfig::default()
            .with_heartbeat_interval(Duration::from_secs(30))
            .with_batch_window(Duration::from_millis(10))
    }

    fn make_fs() -> (LocalAllocDir, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let alloc = LocalAllocDir::new(dir.path()).with_watch_config(WatchConfig {
            poll_interval: Duration::from_millis(10),
        });
        (alloc, dir)
    }

    fn make_framer(config: &StreamConfig) -> (StreamFramer, FrameReceiver) {
        let (tx, rx) = frame_channel(config.frame_channel_capacity);
        let framer = StreamFramer::new(
            tx,
            config.heartbeat_interval,
            config.batch_window,
            config.max_frame_size,
        );
        framer.run();
        (framer, rx)
    }

    async fn next_frame(rx: &mut FrameReceiver) -> StreamFrame {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame before timeout")
            .expect("frame channel open")
    }

    /// Accumulates data frames until `want` bytes arrived; returns the
    /// bytes and the offset of the last frame.
    async fn collect_data(rx: &mut FrameReceiver, want: usize) -> (Vec<u8>, i64) {
        let mut data = Vec::new();
        let mut offset = 0;
        while data.len() < want {
            let frame = next_frame(rx).await;
            assert!(frame.file_event.is_empty(), "unexpected event frame");
            data.extend_from_slice(&frame.data);
            offset = frame.offset;
        }
        (data, offset)
    }

    #[tokio::test]
    async fn streams_file_to_eof_and_exits_on_closed_cancel() {
        let (alloc, dir) = make_fs();
        fs::write(dir.path().join("out"), b"0123456789").unwrap();
        let config = test_config();
        let (framer, mut rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        stream_file(
            &ctx,
            0,
            "out",
            0,
            &alloc,
            &framer,
            Some(closed_eof_cancel()),
            &config,
        )
        .await
        .unwrap();
        framer.destroy().await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.data, b"0123456789");
        assert_eq!(frame.offset, 10);
    }

    #[tokio::test]
    async fn honors_start_offset_and_limit() {
        let (alloc, dir) = make_fs();
        fs::write(dir.path().join("out"), b"0123456789").unwrap();
        let config = test_config();
        let (framer, mut rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        stream_file(
            &ctx,
            2,
            "out",
            5,
            &alloc,
            &framer,
            Some(closed_eof_cancel()),
            &config,
        )
        .await
        .unwrap();
        framer.destroy().await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.data, b"23456");
        assert_eq!(frame.offset, 7);
    }

    #[tokio::test]
    async fn follows_appends_past_eof() {
        let (alloc, dir) = make_fs();
        let path = dir.path().join("out");
        fs::write(&path, b"start").unwrap();
        let config = test_config();
        let (framer, mut rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        let tail_ctx = ctx.clone();
        let tail_framer = framer.clone();
        let tail_config = config.clone();
        let handle = tokio::spawn(async move {
            stream_file(
                &tail_ctx,
                0,
                "out",
                0,
                &alloc,
                &tail_framer,
                None,
                &tail_config,
            )
            .await
        });

        let (data, _) = collect_data(&mut rx, 5).await;
        assert_eq!(data, b"start");

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b" more").unwrap();
        file.flush().unwrap();

        let (data, offset) = collect_data(&mut rx, 5).await;
        assert_eq!(data, b" more");
        assert_eq!(offset, 10);

        ctx.cancel();
        handle.await.unwrap().unwrap();
        framer.destroy().await;
    }

    #[tokio::test]
    async fn truncation_restarts_offsets_and_preserves_limit() {
        let (alloc, dir) = make_fs();
        let path = dir.path().join("out");
        fs::write(&path, b"01234").unwrap();
        let config = test_config();
        let (framer, mut rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        let tail_ctx = ctx.clone();
        let tail_framer = framer.clone();
        let tail_config = config.clone();
        let handle = tokio::spawn(async move {
            stream_file(
                &tail_ctx,
                0,
                "out",
                8,
                &alloc,
                &tail_framer,
                None,
                &tail_config,
            )
            .await
        });

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.data, b"01234");
        assert_eq!(frame.offset, 5);

        // Truncate to empty and wait for the event frame.
        fs::write(&path, b"").unwrap();
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.file_event, StreamFrame::TRUNCATE_EVENT);

        // Only 3 bytes of the original 8-byte limit remain.
        fs::write(&path, b"abcdefgh").unwrap();
        let (data, offset) = collect_data(&mut rx, 3).await;
        assert_eq!(data, b"abc");
        assert_eq!(offset, 3, "offsets restart after truncation");

        ctx.cancel();
        handle.await.unwrap().unwrap();
        framer.destroy().await;
    }

    #[tokio::test]
    async fn deletion_emits_event_and_returns() {
        let (alloc, dir) = make_fs();
        let path = dir.path().join("out");
        fs::write(&path, b"gone soon").unwrap();
        let config = test_config();
        let (framer, mut rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        let tail_ctx = ctx.clone();
        let tail_framer = framer.clone();
        let tail_config = config.clone();
        let handle = tokio::spawn(async move {
            stream_file(
                &tail_ctx,
                0,
                "out",
                0,
                &alloc,
                &tail_framer,
                None,
                &tail_config,
            )
            .await
        });

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.data, b"gone soon");

        fs::remove_file(&path).unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.file_event, StreamFrame::DELETE_EVENT);
        assert_eq!(frame.offset, 9);

        handle.await.unwrap().unwrap();
        framer.destroy().await;
    }

    #[tokio::test]
    async fn cancellation_unparks_the_tailer() {
        let (alloc, dir) = make_fs();
        fs::write(dir.path().join("out"), b"x").unwrap();
        let config = test_config();
        let (framer, mut rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        let tail_ctx = ctx.clone();
        let tail_framer = framer.clone();
        let tail_config = config.clone();
        let handle = tokio::spawn(async move {
            stream_file(
                &tail_ctx,
                0,
                "out",
                0,
                &alloc,
                &tail_framer,
                None,
                &tail_config,
            )
            .await
        });

        let _ = next_frame(&mut rx).await;
        ctx.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("tailer exits on cancellation")
            .unwrap()
            .unwrap();
        framer.destroy().await;
    }

    #[tokio::test]
    async fn missing_file_surfaces_not_found() {
        let (alloc, _dir) = make_fs();
        let config = test_config();
        let (framer, _rx) = make_framer(&config);
        let ctx = CancellationToken::new();

        let err = stream_file(
            &ctx,
            0,
            "absent",
            0,
            &alloc,
            &framer,
            Some(closed_eof_cancel()),
            &config,
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        framer.destroy().await;
    }
}
