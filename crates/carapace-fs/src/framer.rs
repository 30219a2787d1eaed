//! Frame batching, splitting, and heartbeats.
//!
//! This module provides:
//! - [`StreamFramer`] — Accepts bytes plus annotations and emits
//!   size-bounded, time-bounded frames into a bounded channel
//! - [`FrameReceiver`] — The consuming end of the frame channel,
//!   usable as a [`futures::Stream`]
//! - [`frame_channel`] — Constructor for the bounded pair
//!
//! Emission blocks on the frame channel, so a slow consumer holds the
//! producer and the timers back; that is the flow control.

use std::sync::Arc;
use std::time::Duration;

use carapace_proto::StreamFrame;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, Result};

/// Creates the bounded frame channel of one streaming session.
#[must_use]
pub fn frame_channel(capacity: usize) -> (mpsc::Sender<StreamFrame>, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, FrameReceiver { rx })
}

/// Consuming end of the frame channel.
pub struct FrameReceiver {
    rx: mpsc::Receiver<StreamFrame>,
}

impl FrameReceiver {
    /// Receives the next frame, or `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }
}

impl Stream for FrameReceiver {
    type Item = StreamFrame;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Bytes accumulated toward the next data frame.
struct Pending {
    file: String,
    data: Vec<u8>,
    /// Absolute offset reached after the last accumulated byte.
    offset: i64,
}

struct FramerInner {
    destroyed: bool,
    pending: Option<Pending>,
    /// Position stamped onto heartbeat frames.
    last_file: String,
    last_offset: i64,
    /// When the last frame of any kind was emitted.
    last_emit: Instant,
}

struct FramerShared {
    out: mpsc::Sender<StreamFrame>,
    inner: tokio::sync::Mutex<FramerInner>,
    exit: CancellationToken,
    heartbeat_interval: Duration,
    batch_window: Duration,
    max_frame_size: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Batches bytes into framed messages under a size + time + heartbeat
/// policy.
///
/// Cloning hands out another handle to the same framer.
#[derive(Clone)]
pub struct StreamFramer {
    shared: Arc<FramerShared>,
}

impl StreamFramer {
    /// Creates a framer writing into `out`.
    #[must_use]
    pub fn new(
        out: mpsc::Sender<StreamFrame>,
        heartbeat_interval: Duration,
        batch_window: Duration,
        max_frame_size: usize,
    ) -> Self {
        Self {
            shared: Arc::new(FramerShared {
                out,
                inner: tokio::sync::Mutex::new(FramerInner {
                    destroyed: false,
                    pending: None,
                    last_file: String::new(),
                    last_offset: 0,
                    last_emit: Instant::now(),
                }),
                exit: CancellationToken::new(),
                heartbeat_interval,
                batch_window,
                max_frame_size,
                task: Mutex::new(None),
            }),
        }
    }

    /// Starts the batch and heartbeat timers. Idempotent.
    pub fn run(&self) {
        let mut task = self.shared.task.lock();
        if task.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(Self::run_loop(shared)));
    }

    /// Seeds the position stamped onto heartbeats before any data has
    /// been sent, e.g. when tailing from end-of-file.
    pub async fn set_position(&self, file: &str, offset: i64) {
        let mut inner = self.shared.inner.lock().await;
        inner.last_file = file.to_string();
        inner.last_offset = offset;
    }

    /// Appends bytes (or an event) for `file` and emits zero or more
    /// frames.
    ///
    /// An event flushes any pending data first and is then emitted
    /// immediately; plain data is split into frames of at most the
    /// maximum frame size, with the residue left to the batch timer.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::FramerClosed`] after [`destroy`](Self::destroy)
    /// or once the frame channel is gone.
    pub async fn send(&self, file: &str, event: &str, data: &[u8], offset: i64) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.destroyed {
            return Err(FsError::FramerClosed);
        }

        inner.last_file = file.to_string();
        inner.last_offset = offset;

        if !event.is_empty() {
            if let Some(pending) = inner.pending.take() {
                self.emit(&mut inner, pending_frame(pending)).await?;
            }
            let frame = StreamFrame::event(file, event, data.to_vec(), offset);
            return self.emit(&mut inner, frame).await;
        }

        // A path change flushes the old file's residue before the new
        // file starts accumulating.
        if inner
            .pending
            .as_ref()
            .is_some_and(|p| p.file != file)
        {
            let pending = inner.pending.take().expect("pending checked above");
            self.emit(&mut inner, pending_frame(pending)).await?;
        }

        match inner.pending.as_mut() {
            Some(pending) => {
                pending.data.extend_from_slice(data);
                pending.offset = offset;
            }
            None => {
                inner.pending = Some(Pending {
                    file: file.to_string(),
                    data: data.to_vec(),
                    offset,
                });
            }
        }

        loop {
            let chunk = {
                let pending = inner.pending.as_mut().expect("pending set above");
                if pending.data.len() < self.shared.max_frame_size {
                    break;
                }
                let chunk: Vec<u8> = pending.data.drain(..self.shared.max_frame_size).collect();
                let remaining = pending.data.len() as i64;
                StreamFrame::data(pending.file.clone(), chunk, pending.offset - remaining)
            };
            self.emit(&mut inner, chunk).await?;
        }
        if inner
            .pending
            .as_ref()
            .is_some_and(|p| p.data.is_empty())
        {
            inner.pending = None;
        }

        Ok(())
    }

    /// Flushes any pending frame and stops the timers. Idempotent.
    ///
    /// Subsequent [`send`](Self::send) calls fail with
    /// [`FsError::FramerClosed`].
    pub async fn destroy(&self) {
        {
            let mut inner = self.shared.inner.lock().await;
            if !inner.destroyed {
                inner.destroyed = true;
                if let Some(pending) = inner.pending.take() {
                    let _ = self.emit(&mut inner, pending_frame(pending)).await;
                }
            }
        }
        self.shared.exit.cancel();

        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Cancellation handle observed by producers; cancelled once the
    /// framer has been destroyed.
    #[must_use]
    pub fn exit_handle(&self) -> CancellationToken {
        self.shared.exit.clone()
    }

    /// Returns true once the framer has been destroyed.
    #[must_use]
    pub fn is_exited(&self) -> bool {
        self.shared.exit.is_cancelled()
    }

    async fn emit(&self, inner: &mut FramerInner, frame: StreamFrame) -> Result<()> {
        if self.shared.out.send(frame).await.is_err() {
            return Err(FsError::FramerClosed);
        }
        inner.last_emit = Instant::now();
        Ok(())
    }

    async fn run_loop(shared: Arc<FramerShared>) {
        let mut batch = tokio::time::interval(shared.batch_window);
        batch.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(shared.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shared.exit.cancelled() => return,
                _ = batch.tick() => {
                    let mut inner = shared.inner.lock().await;
                    if let Some(pending) = inner.pending.take() {
                        if shared.out.send(pending_frame(pending)).await.is_err() {
                            return;
                        }
                        inner.last_emit = Instant::now();
                    }
                }
                _ = heartbeat.tick() => {
                    let mut inner = shared.inner.lock().await;
                    if inner.pending.is_none()
                        && inner.last_emit.elapsed() >= shared.heartbeat_interval
                    {
                        let frame =
                            StreamFrame::heartbeat(inner.last_file.clone(), inner.last_offset);
                        if shared.out.send(frame).await.is_err() {
                            return;
                        }
                        inner.last_emit = Instant::now();
                    }
                }
            }
        }
    }
}

fn pending_frame(pending: Pending) -> StreamFrame {
    StreamFrame::data(pending.file, pending.data, pending.offset)
}
