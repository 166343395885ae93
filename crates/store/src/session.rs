//! Durable upload sessions keyed by content fingerprint.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use chunkvault_protocol::ChunkProgress;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::layout::StorageLayout;

/// Boxed future returned by the store's collaborator traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Store-side record of a partially uploaded file.
///
/// `all_chunk_digests` is fixed at creation and defines merge order.
/// `received_chunks` maps each accepted digest to its size at receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub content_fingerprint: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub all_chunk_digests: Vec<String>,
    #[serde(default)]
    pub received_chunks: BTreeMap<String, u64>,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        content_fingerprint: impl Into<String>,
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
        all_chunk_digests: Vec<String>,
        destination_folder_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            content_fingerprint: content_fingerprint.into(),
            file_name: file_name.into(),
            file_size,
            mime_type: mime_type.into(),
            all_chunk_digests,
            received_chunks: BTreeMap::new(),
            owner_id: owner_id.into(),
            destination_folder_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expected(&self, digest: &str) -> bool {
        self.all_chunk_digests.iter().any(|d| d == digest)
    }

    pub fn is_received(&self, digest: &str) -> bool {
        self.received_chunks.contains_key(digest)
    }

    /// Records an accepted chunk. Returns false for digests outside the
    /// expected set, which are left unrecorded.
    pub fn mark_received(&mut self, digest: &str, size: u64) -> bool {
        if !self.is_expected(digest) {
            return false;
        }
        self.received_chunks.insert(digest.to_string(), size);
        self.touch();
        true
    }

    /// Drops a chunk from the received set so it is requested again.
    pub fn forget_received(&mut self, digest: &str) -> bool {
        let removed = self.received_chunks.remove(digest).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    /// Expected digests not yet received, in chunk order, without repeats.
    pub fn remaining(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.all_chunk_digests
            .iter()
            .filter(|d| !self.received_chunks.contains_key(d.as_str()))
            .filter(|d| seen.insert(d.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.all_chunk_digests
            .iter()
            .all(|d| self.received_chunks.contains_key(d))
    }

    /// Progress over chunk positions.
    pub fn progress(&self) -> ChunkProgress {
        let uploaded = self
            .all_chunk_digests
            .iter()
            .filter(|d| self.received_chunks.contains_key(d.as_str()))
            .count();
        ChunkProgress::new(uploaded, self.all_chunk_digests.len())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Durable get/put/delete of sessions by fingerprint.
///
/// Implementations only need atomic single-key writes. Read-modify-write
/// sequences are serialized per fingerprint by the caller.
pub trait SessionStore: Send + Sync {
    fn get<'a>(&'a self, fingerprint: &'a str) -> StoreFuture<'a, Option<UploadSession>>;

    fn put<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()>;

    /// Removes the session. Returns whether one existed.
    fn delete<'a>(&'a self, fingerprint: &'a str) -> StoreFuture<'a, bool>;
}

/// Sessions as JSON files under `<root>/temp/`.
pub struct FsSessionStore {
    layout: StorageLayout,
}

impl FsSessionStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }
}

impl SessionStore for FsSessionStore {
    fn get<'a>(&'a self, fingerprint: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        Box::pin(async move {
            let path = self.layout.session_path(fingerprint);
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.layout.session_path(&session.content_fingerprint);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let data = serde_json::to_vec_pretty(session)?;
            let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, &data).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            debug!(
                fingerprint = %session.content_fingerprint,
                received = session.received_chunks.len(),
                "session saved"
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, fingerprint: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.layout.session_path(fingerprint)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Sessions held in memory. Lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get<'a>(&'a self, fingerprint: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        Box::pin(async move { Ok(self.sessions.lock().await.get(fingerprint).cloned()) })
    }

    fn put<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions
                .lock()
                .await
                .insert(session.content_fingerprint.clone(), session.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, fingerprint: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.sessions.lock().await.remove(fingerprint).is_some()) })
    }
}
