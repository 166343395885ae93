//! Reassembly of received chunks into the final object.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{FileCatalog, FileRecord, NewFileRecord, QuotaLedger, unique_file_name};
use crate::error::StoreError;
use crate::layout::StorageLayout;
use crate::session::{SessionStore, UploadSession};

/// A verified object on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedObject {
    pub location: PathBuf,
    pub size: u64,
}

/// Concatenates the session's chunks in `all_chunk_digests` order.
///
/// Every chunk file must still have the size recorded at receipt, and the
/// result must be exactly `file_size` bytes. Output goes to a `.partial`
/// file that is renamed into place only after both checks pass; on failure
/// it is removed and nothing else is touched. Blocking.
pub fn assemble_chunks(
    layout: &StorageLayout,
    session: &UploadSession,
) -> Result<MergedObject, StoreError> {
    let fingerprint = &session.content_fingerprint;
    std::fs::create_dir_all(layout.objects_dir())?;
    let partial = layout.partial_object_path(fingerprint);

    let result = write_partial(layout, session, &partial);
    let size = match result {
        Ok(size) => size,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
    };

    let location = layout.object_path(fingerprint);
    std::fs::rename(&partial, &location)?;
    Ok(MergedObject { location, size })
}

fn write_partial(
    layout: &StorageLayout,
    session: &UploadSession,
    partial: &std::path::Path,
) -> Result<u64, StoreError> {
    let fingerprint = &session.content_fingerprint;
    let mut out = BufWriter::new(File::create(partial)?);
    let mut total: u64 = 0;

    for (index, digest) in session.all_chunk_digests.iter().enumerate() {
        let recorded = session.received_chunks.get(digest).copied().ok_or_else(|| {
            StoreError::IntegrityFailure(format!("chunk {index} ({digest}) was never received"))
        })?;

        let path = layout.chunk_path(fingerprint, digest);
        let mut chunk = File::open(&path).map_err(|e| {
            StoreError::IntegrityFailure(format!("chunk {index} ({digest}) unreadable: {e}"))
        })?;
        let on_disk = chunk.metadata()?.len();
        if on_disk != recorded {
            return Err(StoreError::IntegrityFailure(format!(
                "chunk {index} ({digest}) is {on_disk} bytes, expected {recorded}"
            )));
        }

        let copied = std::io::copy(&mut chunk, &mut out)?;
        if copied != recorded {
            return Err(StoreError::IntegrityFailure(format!(
                "chunk {index} ({digest}) changed while merging"
            )));
        }
        total += copied;
    }

    if total != session.file_size {
        return Err(StoreError::IntegrityFailure(format!(
            "merged size {total} does not match declared size {}",
            session.file_size
        )));
    }

    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(total)
}

/// Received chunks whose file is missing, unreadable or no longer the size
/// recorded at receipt. Blocking.
pub fn damaged_chunks(layout: &StorageLayout, session: &UploadSession) -> Vec<String> {
    session
        .received_chunks
        .iter()
        .filter(|&(digest, &recorded)| {
            std::fs::metadata(layout.chunk_path(&session.content_fingerprint, digest))
                .map_or(true, |meta| meta.len() != recorded)
        })
        .map(|(digest, _)| digest.clone())
        .collect()
}

/// Turns a complete session into a file record.
pub struct MergeEngine {
    layout: StorageLayout,
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn FileCatalog>,
    quota: Arc<dyn QuotaLedger>,
}

impl MergeEngine {
    pub fn new(
        layout: StorageLayout,
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn FileCatalog>,
        quota: Arc<dyn QuotaLedger>,
    ) -> Self {
        Self {
            layout,
            sessions,
            catalog,
            quota,
        }
    }

    /// Assembles and verifies the object, then records it and charges the
    /// owner's quota. Temp artifacts are removed only after success.
    ///
    /// The caller must hold the session's fingerprint lock.
    pub async fn merge(&self, session: &UploadSession) -> Result<FileRecord, StoreError> {
        let fingerprint = session.content_fingerprint.clone();
        info!(
            fingerprint = %fingerprint,
            chunks = session.all_chunk_digests.len(),
            file_size = session.file_size,
            "merging chunks"
        );

        let layout = self.layout.clone();
        let snapshot = session.clone();
        let assembled = tokio::task::spawn_blocking(move || assemble_chunks(&layout, &snapshot))
            .await
            .map_err(|e| StoreError::Internal(format!("merge task failed: {e}")))?;
        let merged = match assembled {
            Ok(merged) => merged,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "merge aborted");
                if matches!(e, StoreError::IntegrityFailure(_)) {
                    self.requeue_damaged(session).await;
                }
                return Err(e);
            }
        };

        let name = unique_file_name(
            self.catalog.as_ref(),
            &session.owner_id,
            session.destination_folder_id.as_deref(),
            &session.file_name,
        )
        .await?;
        let record = self
            .catalog
            .create_file_record(NewFileRecord {
                owner_id: session.owner_id.clone(),
                content_fingerprint: fingerprint.clone(),
                location: merged.location,
                size: merged.size,
                name,
                parent_id: session.destination_folder_id.clone(),
                mime_type: session.mime_type.clone(),
            })
            .await?;
        self.quota
            .add_used_space(&session.owner_id, merged.size as i64)
            .await?;

        self.cleanup(&fingerprint).await;
        info!(fingerprint = %fingerprint, file_id = %record.id, "upload merged");
        Ok(record)
    }

    /// Marks damaged chunks as missing so the next handshake asks for them.
    async fn requeue_damaged(&self, session: &UploadSession) {
        let layout = self.layout.clone();
        let snapshot = session.clone();
        let damaged =
            match tokio::task::spawn_blocking(move || damaged_chunks(&layout, &snapshot)).await {
                Ok(damaged) => damaged,
                Err(e) => {
                    warn!(error = %e, "chunk inspection task failed");
                    return;
                }
            };
        if damaged.is_empty() {
            return;
        }

        let fingerprint = session.content_fingerprint.as_str();
        let mut session = session.clone();
        for digest in &damaged {
            session.forget_received(digest);
            let path = self.layout.chunk_path(fingerprint, digest);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(fingerprint, digest = %digest, error = %e, "failed to remove damaged chunk");
            }
        }
        match self.sessions.put(&session).await {
            Ok(()) => warn!(fingerprint, chunks = ?damaged, "damaged chunks requeued"),
            Err(e) => warn!(fingerprint, error = %e, "failed to requeue damaged chunks"),
        }
    }

    /// Removes the session and its chunk directory, logging failures.
    pub async fn cleanup(&self, fingerprint: &str) -> bool {
        let mut ok = true;
        if let Err(e) = self.sessions.delete(fingerprint).await {
            warn!(fingerprint, error = %e, "failed to delete session");
            ok = false;
        }
        match tokio::fs::remove_dir_all(self.layout.chunk_dir(fingerprint)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(fingerprint, error = %e, "failed to remove chunk directory");
                ok = false;
            }
        }
        ok
    }
}
