//! Shared fixtures for session integration tests: a temp-dir backed
//! allocation catalog and a line-oriented test client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use carapace_allocdir::{AllocDirFs, LocalAllocDir, WatchConfig};
use carapace_fs::{
    AclDisabled, AllocCatalog, AllocInfo, FileSystemEndpoint, FsError, Result, StreamConfig,
    TaskState,
};
use carapace_proto::{StreamFrame, StreamResponse};
use chrono::Utc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

pub struct TestCatalog {
    allocs: HashMap<String, (Arc<dyn AllocDirFs>, AllocInfo)>,
}

impl AllocCatalog for TestCatalog {
    fn alloc_dir(&self, alloc_id: &str) -> Result<Arc<dyn AllocDirFs>> {
        self.allocs
            .get(alloc_id)
            .map(|(fs, _)| Arc::clone(fs))
            .ok_or_else(|| FsError::UnknownAllocation(alloc_id.to_string()))
    }

    fn alloc_info(&self, alloc_id: &str) -> Result<AllocInfo> {
        self.allocs
            .get(alloc_id)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| FsError::UnknownAllocation(alloc_id.to_string()))
    }
}

/// Installs a subscriber so `RUST_LOG=carapace_fs=trace cargo test`
/// shows the session's decisions. Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Stream tunables shrunk for tests: fast batching and polling, with
/// heartbeats effectively off unless a test turns them back on.
pub fn test_config() -> StreamConfig {
    StreamConfig::default()
        .with_heartbeat_interval(Duration::from_secs(30))
        .with_batch_window(Duration::from_millis(10))
        .with_next_log_check(Duration::from_millis(10))
}

/// Builds an endpoint hosting one allocation `a1` with one started task
/// `web`, rooted at a fresh temp dir.
pub fn make_endpoint(config: StreamConfig) -> (FileSystemEndpoint, TempDir) {
    init_tracing();
    let dir = TempDir::new().expect("create temp dir");
    std::fs::create_dir_all(dir.path().join("alloc/logs")).unwrap();

    let alloc: Arc<dyn AllocDirFs> =
        Arc::new(LocalAllocDir::new(dir.path()).with_watch_config(WatchConfig {
            poll_interval: Duration::from_millis(10),
        }));
    let info = AllocInfo::with_tasks([("web".to_string(), TaskState::started(Utc::now()))]);
    let catalog = TestCatalog {
        allocs: HashMap::from([("a1".to_string(), (alloc, info))]),
    };

    let endpoint =
        FileSystemEndpoint::new(Arc::new(catalog), Arc::new(AclDisabled)).with_config(config);
    (endpoint, dir)
}

/// Client side of one in-memory streaming connection.
pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl TestClient {
    /// Opens a duplex pair and hands the server half to `serve`.
    pub fn connect(
        serve: impl FnOnce(DuplexStream) -> tokio::task::JoinHandle<()>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = serve(server);
        let (rd, wr) = tokio::io::split(client);
        (
            Self {
                reader: BufReader::new(rd),
                writer: wr,
            },
            session,
        )
    }

    /// Sends the request record.
    pub async fn send_request(&mut self, mut json: Vec<u8>) {
        json.push(b'\n');
        self.writer.write_all(&json).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads the next response record; `None` once the server closed.
    pub async fn next_response(&mut self) -> Option<StreamResponse> {
        let mut line = Vec::new();
        match tokio::time::timeout(
            Duration::from_secs(10),
            self.reader.read_until(b'\n', &mut line),
        )
        .await
        .expect("response before timeout")
        {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(StreamResponse::from_json(&line).unwrap()),
        }
    }

    /// Reads the next JSON-framed [`StreamFrame`]; `None` at stream end.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        let resp = self.next_response().await?;
        assert!(resp.error.is_none(), "unexpected error: {:?}", resp.error);
        Some(StreamFrame::from_json(&resp.payload).unwrap())
    }
}
