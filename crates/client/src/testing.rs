//! Test transport backed by an in-process store.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chunkvault_protocol::{
    CancelRequest, CancelResponse, ChunkQuery, ChunkResponse, HandshakeRequest,
    HandshakeResponse,
};
use chunkvault_store::{
    FsSessionStore, MemoryCatalog, MemoryQuota, StorageLayout, StoreError, UploadService,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::error::ClientError;
use crate::transport::{TransportFuture, UploadTransport};

pub struct Store {
    pub service: Arc<UploadService>,
    pub catalog: Arc<MemoryCatalog>,
    pub quota: Arc<MemoryQuota>,
    pub dir: TempDir,
}

impl Store {
    pub fn new(quota_limit: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("store"));
        let catalog = Arc::new(MemoryCatalog::new());
        let quota = Arc::new(MemoryQuota::new(quota_limit));
        let service = Arc::new(UploadService::new(
            layout.clone(),
            Arc::new(FsSessionStore::new(layout)),
            catalog.clone(),
            quota.clone(),
        ));
        Self {
            service,
            catalog,
            quota,
            dir,
        }
    }

    /// Writes a file into the temp dir and returns its path.
    pub fn write_file(&self, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }
}

fn to_client(e: StoreError) -> ClientError {
    ClientError::from_api(e.status_code(), e.to_api_error())
}

/// Calls [`UploadService`] directly, recording traffic.
///
/// With a gate, every chunk request waits for a permit before reaching the
/// store; `arrived` counts requests that reached the gate.
pub struct LocalTransport {
    service: Arc<UploadService>,
    owner: String,
    gate: Option<Arc<Semaphore>>,
    pub arrived: AtomicUsize,
    pub handshakes: Mutex<Vec<String>>,
    pub chunks: Mutex<Vec<(String, usize)>>,
    pub cancels: Mutex<Vec<String>>,
    pub fail_chunks: AtomicBool,
}

impl LocalTransport {
    pub fn new(service: Arc<UploadService>, owner: &str) -> Self {
        Self {
            service,
            owner: owner.to_string(),
            gate: None,
            arrived: AtomicUsize::new(0),
            handshakes: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            fail_chunks: AtomicBool::new(false),
        }
    }

    pub fn gated(service: Arc<UploadService>, owner: &str, permits: usize) -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(permits))),
            ..Self::new(service, owner)
        }
    }

    pub fn open_gate(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn chunk_digests(&self) -> Vec<String> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.clone())
            .collect()
    }

    pub async fn wait_arrived(&self, n: usize) {
        wait_until(|| self.arrived.load(Ordering::SeqCst) >= n).await;
    }
}

impl UploadTransport for LocalTransport {
    fn handshake<'a>(&'a self, req: &'a HandshakeRequest) -> TransportFuture<'a, HandshakeResponse> {
        Box::pin(async move {
            self.handshakes
                .lock()
                .unwrap()
                .push(req.content_fingerprint.clone());
            self.service
                .handshake(&self.owner, req.clone())
                .await
                .map_err(to_client)
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        query: &'a ChunkQuery,
        data: Vec<u8>,
    ) -> TransportFuture<'a, ChunkResponse> {
        Box::pin(async move {
            self.arrived.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail_chunks.load(Ordering::SeqCst) {
                return Err(ClientError::Transport("connection reset".into()));
            }
            self.chunks
                .lock()
                .unwrap()
                .push((query.chunk_digest.clone(), data.len()));
            self.service
                .receive_chunk(&self.owner, query, data)
                .await
                .map_err(to_client)
        })
    }

    fn cancel<'a>(&'a self, req: &'a CancelRequest) -> TransportFuture<'a, CancelResponse> {
        Box::pin(async move {
            self.cancels
                .lock()
                .unwrap()
                .push(req.content_fingerprint.clone());
            self.service
                .cancel(&self.owner, req)
                .await
                .map_err(to_client)
        })
    }
}

/// Polls `cond` until it holds, failing the test after 10 s.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
