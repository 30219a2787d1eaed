//! Per-connection session orchestration.
//!
//! This module provides [`FileSystemEndpoint`], the server side of the
//! four file-system operations. The streaming entry points own one
//! full-duplex byte stream each: the first inbound record is the
//! request, every outbound record is a [`StreamResponse`], and records
//! travel as newline-delimited JSON.
//!
//! Each session runs one cancellation scope over three workers — the
//! producer (tailer or log driver), the framer timers, and a
//! peer-closure watcher — plus the serve loop on the session itself.
//! Every teardown path cancels the scope and joins the workers before
//! the connection halves are released.

use std::sync::Arc;

use carapace_proto::{
    AllocFileInfo, FsListRequest, FsLogsRequest, FsStatRequest, FsStreamRequest, LogKind, Origin,
    StreamResponse,
};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acl::{Capability, TokenResolver};
use crate::catalog::AllocCatalog;
use crate::config::StreamConfig;
use crate::driver::logs_impl;
use crate::error::{map_transport_err, FsError, Result};
use crate::framer::{frame_channel, FrameReceiver, StreamFramer};
use crate::tailer::{closed_eof_cancel, stream_file};

/// Streaming method name for raw file streaming, as registered with the
/// RPC dispatcher.
pub const STREAM_METHOD: &str = "FileSystem.Stream";

/// Streaming method name for task log streaming, as registered with the
/// RPC dispatcher.
pub const LOGS_METHOD: &str = "FileSystem.Logs";

/// Server side of the allocation file-system operations.
#[derive(Clone)]
pub struct FileSystemEndpoint {
    catalog: Arc<dyn AllocCatalog>,
    acl: Arc<dyn TokenResolver>,
    config: StreamConfig,
}

impl FileSystemEndpoint {
    /// Creates an endpoint over the node's catalog and token resolver.
    #[must_use]
    pub fn new(catalog: Arc<dyn AllocCatalog>, acl: Arc<dyn TokenResolver>) -> Self {
        Self {
            catalog,
            acl,
            config: StreamConfig::default(),
        }
    }

    /// Overrides the stream tunables.
    #[must_use]
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Lists the contents of a directory in an allocation.
    ///
    /// # Errors
    ///
    /// Returns authorization, catalog, and filesystem failures.
    pub fn list(&self, req: &FsListRequest) -> Result<Vec<AllocFileInfo>> {
        self.authorize(&req.auth_token, &req.namespace, &[Capability::ReadFs])?;
        let fs = self.catalog.alloc_dir(&req.alloc_id)?;
        Ok(fs.list(&req.path)?)
    }

    /// Stats a file in an allocation.
    ///
    /// # Errors
    ///
    /// Returns authorization, catalog, and filesystem failures.
    pub fn stat(&self, req: &FsStatRequest) -> Result<AllocFileInfo> {
        self.authorize(&req.auth_token, &req.namespace, &[Capability::ReadFs])?;
        let fs = self.catalog.alloc_dir(&req.alloc_id)?;
        Ok(fs.stat(&req.path)?)
    }

    /// Serves one raw file-streaming connection.
    pub async fn stream<S>(&self, conn: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (rd, wr) = tokio::io::split(conn);
        let mut reader = BufReader::new(rd);
        let mut writer = wr;

        let Some(line) = read_request_line(&mut reader).await else {
            return;
        };
        let req = match FsStreamRequest::from_json(&line) {
            Ok(req) => req,
            Err(e) => {
                write_result_error(&mut writer, &FsError::from(e), Some(500)).await;
                return;
            }
        };

        if let Err(err) =
            self.authorize(&req.auth_token, &req.namespace, &[Capability::ReadFs])
        {
            write_result_error(&mut writer, &err, err.code()).await;
            return;
        }

        if req.alloc_id.is_empty() {
            write_result_error(&mut writer, &FsError::AllocIdRequired, Some(400)).await;
            return;
        }
        if req.path.is_empty() {
            write_result_error(&mut writer, &FsError::PathRequired, Some(400)).await;
            return;
        }
        let origin = match Origin::parse(&req.origin) {
            Ok(origin) => origin,
            Err(_) => {
                write_result_error(&mut writer, &FsError::InvalidOrigin, Some(400)).await;
                return;
            }
        };

        let fs = match self.catalog.alloc_dir(&req.alloc_id) {
            Ok(fs) => fs,
            Err(err) => {
                write_result_error(&mut writer, &err, err.code()).await;
                return;
            }
        };

        let info = match fs.stat(&req.path) {
            Ok(info) => info,
            Err(e) => {
                write_result_error(&mut writer, &FsError::from(e), Some(400)).await;
                return;
            }
        };
        if info.is_dir {
            let err = FsError::IsDirectory(req.path.clone());
            write_result_error(&mut writer, &err, Some(400)).await;
            return;
        }

        // An end origin counts the offset back from the current size.
        let offset = match origin {
            Origin::Start => req.offset,
            Origin::End => (info.size - req.offset).max(0),
        };

        debug!(
            alloc_id = %req.alloc_id,
            path = %req.path,
            offset,
            follow = req.follow,
            "serving file stream"
        );

        let ctx = CancellationToken::new();
        let (frames_tx, frames_rx) = frame_channel(self.config.frame_channel_capacity);
        let (err_tx, mut err_rx) = mpsc::channel(1);

        let framer = StreamFramer::new(
            frames_tx,
            self.config.heartbeat_interval,
            self.config.batch_window,
            self.config.max_frame_size,
        );
        framer.run();

        // Without follow, the first EOF ends the stream.
        let eof_cancel = (!req.follow).then(closed_eof_cancel);

        // The producer owns the only framer handle: once it destroys the
        // framer and exits, the frame channel closes and the serve loop
        // below observes the end of the stream.
        let producer = {
            let ctx = ctx.clone();
            let fs = Arc::clone(&fs);
            let err_tx = err_tx.clone();
            let path = req.path.clone();
            let limit = req.limit;
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(err) = stream_file(
                    &ctx,
                    offset,
                    &path,
                    limit,
                    fs.as_ref(),
                    &framer,
                    eof_cancel,
                    &config,
                )
                .await
                {
                    let _ = err_tx.send(err).await;
                }
                framer.destroy().await;
            })
        };

        let watcher = spawn_peer_watcher(ctx.clone(), reader, err_tx);

        let stream_err =
            serve_frames(&ctx, req.plain_text, frames_rx, &mut err_rx, &mut writer).await;

        ctx.cancel();
        let _ = producer.await;
        let _ = watcher.await;

        // A worker may have reported its failure in the same instant the
        // frame channel closed; with the workers joined, pick it up.
        let stream_err = stream_err.or_else(|| err_rx.try_recv().ok());

        if let Some(err) = stream_err {
            warn!(alloc_id = %req.alloc_id, path = %req.path, error = %err, "file stream failed");
            write_result_error(&mut writer, &err, err.code()).await;
        }
    }

    /// Serves one task log-streaming connection.
    pub async fn logs<S>(&self, conn: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (rd, wr) = tokio::io::split(conn);
        let mut reader = BufReader::new(rd);
        let mut writer = wr;

        let Some(line) = read_request_line(&mut reader).await else {
            return;
        };
        let req = match FsLogsRequest::from_json(&line) {
            Ok(req) => req,
            Err(e) => {
                write_result_error(&mut writer, &FsError::from(e), Some(500)).await;
                return;
            }
        };

        // Either capability unlocks logs.
        if let Err(err) = self.authorize(
            &req.auth_token,
            &req.namespace,
            &[Capability::ReadFs, Capability::ReadLogs],
        ) {
            write_result_error(&mut writer, &err, err.code()).await;
            return;
        }

        if req.alloc_id.is_empty() {
            write_result_error(&mut writer, &FsError::AllocIdRequired, Some(400)).await;
            return;
        }
        if req.task.is_empty() {
            write_result_error(&mut writer, &FsError::TaskRequired, Some(400)).await;
            return;
        }
        let log_type = match LogKind::parse(&req.log_type) {
            Ok(kind) => kind,
            Err(_) => {
                write_result_error(&mut writer, &FsError::LogTypeRequired, Some(400)).await;
                return;
            }
        };
        let origin = match Origin::parse(&req.origin) {
            Ok(origin) => origin,
            Err(_) => {
                write_result_error(&mut writer, &FsError::InvalidOrigin, Some(400)).await;
                return;
            }
        };

        let fs = match self.catalog.alloc_dir(&req.alloc_id) {
            Ok(fs) => fs,
            Err(err) => {
                write_result_error(&mut writer, &err, err.code()).await;
                return;
            }
        };
        let info = match self.catalog.alloc_info(&req.alloc_id) {
            Ok(info) => info,
            Err(err) => {
                write_result_error(&mut writer, &err, err.code()).await;
                return;
            }
        };

        if !info.has_task(&req.task) {
            let err = FsError::UnknownTask(req.task.clone());
            write_result_error(&mut writer, &err, err.code()).await;
            return;
        }
        if !info.task_started(&req.task) {
            let err = FsError::TaskNotStarted(req.task.clone());
            write_result_error(&mut writer, &err, err.code()).await;
            return;
        }

        debug!(
            alloc_id = %req.alloc_id,
            task = %req.task,
            log_type = %log_type,
            follow = req.follow,
            "serving log stream"
        );

        let ctx = CancellationToken::new();
        let (frames_tx, frames_rx) = frame_channel(self.config.frame_channel_capacity);
        let (err_tx, mut err_rx) = mpsc::channel(1);

        let producer = {
            let ctx = ctx.clone();
            let err_tx = err_tx.clone();
            let task = req.task.clone();
            let follow = req.follow;
            let offset = req.offset;
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(err) = logs_impl(
                    &ctx, follow, offset, origin, &task, log_type, fs, frames_tx, &config,
                )
                .await
                {
                    let _ = err_tx.send(err).await;
                }
            })
        };

        let watcher = spawn_peer_watcher(ctx.clone(), reader, err_tx);

        let stream_err =
            serve_frames(&ctx, req.plain_text, frames_rx, &mut err_rx, &mut writer).await;

        ctx.cancel();
        let _ = producer.await;
        let _ = watcher.await;

        // The log driver closes the frame channel before its task can
        // report why; with the workers joined, pick up the verdict.
        let stream_err = stream_err.or_else(|| err_rx.try_recv().ok());

        if let Some(err) = stream_err {
            warn!(alloc_id = %req.alloc_id, task = %req.task, error = %err, "log stream failed");
            write_result_error(&mut writer, &err, err.code()).await;
        }
    }

    fn authorize(&self, token: &str, namespace: &str, any_of: &[Capability]) -> Result<()> {
        match self.acl.resolve_token(token)? {
            // ACLs disabled on this node.
            None => Ok(()),
            Some(acl) => {
                if any_of.iter().any(|cap| acl.allows(namespace, *cap)) {
                    Ok(())
                } else {
                    Err(FsError::PermissionDenied)
                }
            }
        }
    }
}

/// Reads the newline-delimited request record. `None` means the peer
/// went away before sending one; there is nobody to answer.
async fn read_request_line<R>(reader: &mut BufReader<R>) -> Option<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

/// Watches the inbound half for peer closure: EOF cancels the session
/// scope, hard transport errors surface on the error channel, and any
/// stray client bytes are drained and ignored.
fn spawn_peer_watcher<R>(
    ctx: CancellationToken,
    mut reader: R,
    err_tx: mpsc::Sender<FsError>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                () = ctx.cancelled() => return,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        ctx.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = err_tx.send(map_transport_err(FsError::Io(e))).await;
                        return;
                    }
                }
            }
        }
    })
}

/// Multiplexes frames and errors onto the wire until a terminal
/// condition. Returns the error that ended the stream, if any.
async fn serve_frames<W>(
    ctx: &CancellationToken,
    plain_text: bool,
    mut frames: FrameReceiver,
    err_rx: &mut mpsc::Receiver<FsError>,
    writer: &mut W,
) -> Option<FsError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            Some(err) = err_rx.recv() => return Some(err),
            frame = frames.next() => {
                let Some(frame) = frame else { return None };
                let payload = if plain_text {
                    frame.data
                } else {
                    match frame.to_json() {
                        Ok(bytes) => bytes,
                        Err(e) => return Some(e.into()),
                    }
                };
                if let Err(e) = write_response(writer, &StreamResponse::payload(payload)).await {
                    return Some(e);
                }
            }
            () = ctx.cancelled() => return None,
        }
    }
}

async fn write_response<W>(writer: &mut W, resp: &StreamResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = resp.to_json()?;
    bytes.push(b'\n');
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| map_transport_err(FsError::Io(e)))?;
    writer
        .flush()
        .await
        .map_err(|e| map_transport_err(FsError::Io(e)))?;
    Ok(())
}

/// Writes a trailing error record, unless the transport itself is what
/// failed: a peer that already left gets nothing, and a closed
/// connection would only produce log noise.
async fn write_result_error<W>(writer: &mut W, err: &FsError, code: Option<i64>)
where
    W: AsyncWrite + Unpin,
{
    if matches!(err, FsError::BrokenPipe) {
        return;
    }
    let message = err.to_string();
    if message.contains("closed") {
        return;
    }

    let resp = StreamResponse::error(message, code);
    if let Err(write_err) = write_response(writer, &resp).await {
        debug!(error = %write_err, "dropping trailing error record");
    }
}
