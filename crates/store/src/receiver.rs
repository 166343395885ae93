//! Handshake, chunk receipt and cancel handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chunkvault_hasher::{combine_digests, md5_hex, validate_digest};
use chunkvault_protocol::constants::DEFAULT_MIME_TYPE;
use chunkvault_protocol::{
    CancelRequest, CancelResponse, ChunkQuery, ChunkResponse, HandshakeRequest,
    HandshakeResponse,
};
use tracing::{debug, info, warn};

use crate::catalog::{FileCatalog, NewFileRecord, QuotaLedger, unique_file_name};
use crate::error::StoreError;
use crate::layout::StorageLayout;
use crate::locks::KeyedLocks;
use crate::merge::MergeEngine;
use crate::session::{SessionStore, UploadSession};

/// How long a cancel keeps refusing handshakes that arrived before it.
const CANCEL_MEMORY: Duration = Duration::from_secs(600);

/// Store-side entry point for the three upload requests.
///
/// Every read-modify-write of a session happens under that fingerprint's
/// lock, so concurrent chunks for one upload never lose updates.
///
/// A handshake that arrived before a cancel of the same fingerprint but
/// reached the lock after it is refused with
/// [`StoreError::UploadCancelled`] instead of recreating the session.
pub struct UploadService {
    layout: StorageLayout,
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn FileCatalog>,
    quota: Arc<dyn QuotaLedger>,
    locks: KeyedLocks,
    merger: MergeEngine,
    cancel_epoch: AtomicU64,
    cancelled: Mutex<HashMap<String, (u64, Instant)>>,
}

impl UploadService {
    pub fn new(
        layout: StorageLayout,
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn FileCatalog>,
        quota: Arc<dyn QuotaLedger>,
    ) -> Self {
        let merger = MergeEngine::new(
            layout.clone(),
            Arc::clone(&sessions),
            Arc::clone(&catalog),
            Arc::clone(&quota),
        );
        Self {
            layout,
            sessions,
            catalog,
            quota,
            locks: KeyedLocks::new(),
            merger,
            cancel_epoch: AtomicU64::new(0),
            cancelled: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Current session for `fingerprint`, if any.
    pub async fn session(&self, fingerprint: &str) -> Result<Option<UploadSession>, StoreError> {
        self.sessions.get(fingerprint).await
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    pub async fn handshake(
        &self,
        owner_id: &str,
        req: HandshakeRequest,
    ) -> Result<HandshakeResponse, StoreError> {
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        self.handshake_since(owner_id, req, epoch).await
    }

    /// Handshake for a request that arrived when the cancel epoch was `epoch`.
    async fn handshake_since(
        &self,
        owner_id: &str,
        req: HandshakeRequest,
        epoch: u64,
    ) -> Result<HandshakeResponse, StoreError> {
        validate_handshake(&req)?;
        let fingerprint = req.content_fingerprint.as_str();

        if !self.quota.has_enough_quota(owner_id, req.file_size).await? {
            warn!(owner_id, fingerprint, file_size = req.file_size, "quota exceeded");
            return Err(StoreError::QuotaExceeded {
                requested: req.file_size,
            });
        }

        if let Some(existing) = self.catalog.find_by_fingerprint(owner_id, fingerprint).await? {
            if existing.size != req.file_size {
                warn!(
                    owner_id,
                    fingerprint,
                    declared = req.file_size,
                    stored = existing.size,
                    "instant upload with wrong size"
                );
                return Err(StoreError::ChunkListMismatch(fingerprint.to_string()));
            }
            let name = unique_file_name(
                self.catalog.as_ref(),
                owner_id,
                req.destination_folder_id.as_deref(),
                &req.file_name,
            )
            .await?;
            let record = self
                .catalog
                .create_file_record(NewFileRecord {
                    owner_id: owner_id.to_string(),
                    content_fingerprint: req.content_fingerprint.clone(),
                    location: existing.location,
                    size: existing.size,
                    name,
                    parent_id: req.destination_folder_id.clone(),
                    mime_type: req
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                })
                .await?;
            self.quota
                .add_used_space(owner_id, existing.size as i64)
                .await?;
            info!(owner_id, fingerprint, file_id = %record.id, "instant upload");
            return Ok(HandshakeResponse::complete(record.id));
        }

        let _guard = self.locks.lock(fingerprint).await;
        if self.cancelled_after(fingerprint, epoch) {
            info!(owner_id, fingerprint, "handshake overtaken by cancel");
            return Err(StoreError::UploadCancelled(fingerprint.to_string()));
        }
        let session = match self.sessions.get(fingerprint).await? {
            Some(mut session) => {
                if session.owner_id != owner_id {
                    return Err(StoreError::SessionOwnedByOther(fingerprint.to_string()));
                }
                if session.all_chunk_digests != req.chunk_digests
                    || session.file_size != req.file_size
                {
                    return Err(StoreError::ChunkListMismatch(fingerprint.to_string()));
                }
                session.touch();
                info!(
                    fingerprint,
                    received = session.received_chunks.len(),
                    total = session.all_chunk_digests.len(),
                    "resuming upload session"
                );
                session
            }
            None => {
                tokio::fs::create_dir_all(self.layout.chunk_dir(fingerprint)).await?;
                info!(
                    fingerprint,
                    owner_id,
                    file_size = req.file_size,
                    chunks = req.chunk_digests.len(),
                    "creating upload session"
                );
                UploadSession::new(
                    req.content_fingerprint.clone(),
                    owner_id,
                    req.file_name,
                    req.file_size,
                    req.mime_type
                        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                    req.chunk_digests,
                    req.destination_folder_id,
                )
            }
        };
        self.sessions.put(&session).await?;

        if session.is_complete() {
            // All chunks arrived earlier but the merge never finished.
            let record = self.merger.merge(&session).await?;
            return Ok(HandshakeResponse::complete(record.id));
        }
        Ok(HandshakeResponse::missing(session.remaining()))
    }

    // -----------------------------------------------------------------------
    // Chunk receipt
    // -----------------------------------------------------------------------

    /// Stores one chunk and, when it was the last one, merges the upload.
    pub async fn receive_chunk(
        &self,
        owner_id: &str,
        query: &ChunkQuery,
        data: Vec<u8>,
    ) -> Result<ChunkResponse, StoreError> {
        let fingerprint = query.content_fingerprint.as_str();
        let digest = query.chunk_digest.as_str();
        validate_digest(fingerprint)?;
        validate_digest(digest)?;

        // Reject early, before paying for the hash and the write.
        let session = self
            .sessions
            .get(fingerprint)
            .await?
            .ok_or_else(|| StoreError::UnknownSession(fingerprint.to_string()))?;
        check_chunk(&session, owner_id, query)?;

        let size = data.len() as u64;
        let chunk_path = self.layout.chunk_path(fingerprint, digest);
        let chunk_dir = self.layout.chunk_dir(fingerprint);
        let declared = digest.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let computed = md5_hex(&data);
            if computed != declared {
                return Err(StoreError::ChunkDigestMismatch { declared, computed });
            }
            std::fs::create_dir_all(&chunk_dir)?;
            let tmp = chunk_dir.join(format!("{declared}.{}.part", uuid::Uuid::new_v4()));
            std::fs::write(&tmp, &data)?;
            if let Err(e) = std::fs::rename(&tmp, &chunk_path) {
                let _ = std::fs::remove_file(&tmp);
                return Err(e.into());
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("chunk write task failed: {e}")))??;

        let _guard = self.locks.lock(fingerprint).await;
        // Re-read: the session may have been cancelled or merged meanwhile.
        let Some(mut session) = self.sessions.get(fingerprint).await? else {
            if let Err(e) = tokio::fs::remove_dir_all(self.layout.chunk_dir(fingerprint)).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(fingerprint, error = %e, "failed to remove orphaned chunk directory");
            }
            return Err(StoreError::UnknownSession(fingerprint.to_string()));
        };
        check_chunk(&session, owner_id, query)?;
        session.mark_received(digest, size);
        self.sessions.put(&session).await?;

        let progress = session.progress();
        debug!(
            fingerprint,
            digest,
            index = ?query.chunk_index,
            uploaded = progress.uploaded,
            total = progress.total,
            "chunk accepted"
        );

        if !session.is_complete() {
            return Ok(ChunkResponse {
                remaining_chunk_digests: session.remaining(),
                completed: false,
                file_id: None,
                progress,
            });
        }

        let record = self.merger.merge(&session).await?;
        Ok(ChunkResponse {
            remaining_chunk_digests: Vec::new(),
            completed: true,
            file_id: Some(record.id),
            progress,
        })
    }

    // -----------------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------------

    /// Discards the session and its chunks. Succeeds when none exists.
    pub async fn cancel(
        &self,
        owner_id: &str,
        req: &CancelRequest,
    ) -> Result<CancelResponse, StoreError> {
        let fingerprint = req.content_fingerprint.as_str();
        validate_digest(fingerprint)?;

        let _guard = self.locks.lock(fingerprint).await;
        if let Some(session) = self.sessions.get(fingerprint).await?
            && session.owner_id != owner_id
        {
            return Err(StoreError::SessionOwnedByOther(fingerprint.to_string()));
        }

        self.remember_cancel(fingerprint);
        let success = self.merger.cleanup(fingerprint).await;
        info!(owner_id, fingerprint, success, "upload cancelled");
        Ok(CancelResponse { success })
    }

    /// Records a cancel. Call with the fingerprint lock held.
    fn remember_cancel(&self, fingerprint: &str) {
        let epoch = self.cancel_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Instant::now();
        let mut cancelled = self.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        cancelled.retain(|_, (_, at)| now.duration_since(*at) < CANCEL_MEMORY);
        cancelled.insert(fingerprint.to_string(), (epoch, now));
    }

    /// Whether `fingerprint` was cancelled after the cancel epoch `epoch`.
    fn cancelled_after(&self, fingerprint: &str, epoch: u64) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(fingerprint)
            .is_some_and(|&(cancelled, _)| cancelled > epoch)
    }
}

fn validate_handshake(req: &HandshakeRequest) -> Result<(), StoreError> {
    validate_digest(&req.content_fingerprint)?;
    if req.chunk_digests.is_empty() {
        return Err(StoreError::InvalidRequest(
            "chunkDigests must not be empty".into(),
        ));
    }
    for digest in &req.chunk_digests {
        validate_digest(digest)?;
    }
    if req.file_name.trim().is_empty() {
        return Err(StoreError::InvalidRequest("fileName must not be empty".into()));
    }
    if req.file_name.contains(['/', '\\']) {
        return Err(StoreError::InvalidRequest(format!(
            "fileName must not contain path separators: {}",
            req.file_name
        )));
    }
    if combine_digests(&req.chunk_digests) != req.content_fingerprint {
        return Err(StoreError::ChunkListMismatch(req.content_fingerprint.clone()));
    }
    Ok(())
}

fn check_chunk(
    session: &UploadSession,
    owner_id: &str,
    query: &ChunkQuery,
) -> Result<(), StoreError> {
    if session.owner_id != owner_id {
        return Err(StoreError::SessionOwnedByOther(
            session.content_fingerprint.clone(),
        ));
    }
    let expected = match query.chunk_index {
        Some(i) => session.all_chunk_digests.get(i) == Some(&query.chunk_digest),
        None => session.is_expected(&query.chunk_digest),
    };
    if !expected {
        return Err(StoreError::UnexpectedChunk {
            fingerprint: session.content_fingerprint.clone(),
            digest: query.chunk_digest.clone(),
        });
    }
    Ok(())
}
