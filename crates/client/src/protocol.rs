//! Per-task upload protocol: handshake, chunk loop, completion.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chunkvault_hasher::{FileFingerprint, read_chunk};
use chunkvault_protocol::{ChunkQuery, HandshakeRequest};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::transport::UploadTransport;

/// Everything needed to upload one file.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub path: PathBuf,
    pub plan: Arc<FileFingerprint>,
    pub file_name: String,
    pub destination_folder_id: Option<String>,
    pub mime_type: Option<String>,
}

impl UploadJob {
    fn handshake_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            content_fingerprint: self.plan.fingerprint.clone(),
            chunk_digests: self.plan.chunk_digests.clone(),
            file_name: self.file_name.clone(),
            file_size: self.plan.file_size,
            destination_folder_id: self.destination_folder_id.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// Chunk positions not covered by `remaining`.
    fn uploaded_count(&self, remaining: &[String]) -> usize {
        self.plan
            .chunk_digests
            .iter()
            .filter(|d| !remaining.contains(d))
            .count()
    }
}

/// Progress reported while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolUpdate {
    /// The store answered the handshake with chunks still to send.
    Handshake { uploaded: usize, remaining: Vec<String> },
    /// One chunk was accepted.
    ChunkSent {
        uploaded: usize,
        remaining: Vec<String>,
        bytes: u64,
    },
}

/// Runs the upload protocol for one job over a transport.
pub struct ProtocolClient<'a> {
    transport: &'a dyn UploadTransport,
    cancel: CancellationToken,
}

impl<'a> ProtocolClient<'a> {
    pub fn new(transport: &'a dyn UploadTransport, cancel: CancellationToken) -> Self {
        Self { transport, cancel }
    }

    /// Uploads `job` and returns the stored file id.
    ///
    /// Returns [`ClientError::Cancelled`] as soon as the token fires; the
    /// in-flight request is dropped. Chunks are read from disk one at a time
    /// and released after the store confirms them.
    pub async fn upload<F>(&self, job: &UploadJob, mut on_update: F) -> Result<String, ClientError>
    where
        F: FnMut(ProtocolUpdate) + Send,
    {
        let fingerprint = &job.plan.fingerprint;
        let request = job.handshake_request();

        let mut handshake = self.cancellable(self.transport.handshake(&request)).await?;
        if !handshake.already_complete && handshake.missing_chunk_digests.is_empty() {
            // Nothing missing but not finished: ask once more for the outcome.
            handshake = self.cancellable(self.transport.handshake(&request)).await?;
        }
        if handshake.already_complete {
            debug!(fingerprint = %fingerprint, "store already has content");
            return handshake.file_id.ok_or_else(|| {
                ClientError::Protocol("handshake completed without a file id".into())
            });
        }
        if handshake.missing_chunk_digests.is_empty() {
            return Err(ClientError::Protocol(
                "handshake reported no missing chunks but did not complete".into(),
            ));
        }

        let mut pending: VecDeque<String> = handshake.missing_chunk_digests.into();
        on_update(ProtocolUpdate::Handshake {
            uploaded: job.uploaded_count(pending.make_contiguous()),
            remaining: pending.iter().cloned().collect(),
        });

        let mut sent: HashSet<String> = HashSet::new();
        while let Some(digest) = pending.pop_front() {
            if sent.contains(&digest) {
                continue;
            }
            self.check_cancelled()?;

            let span = *job.plan.span_of(&digest).ok_or_else(|| {
                ClientError::Protocol(format!("store asked for unknown chunk {digest}"))
            })?;

            let path = job.path.clone();
            let data = self
                .cancellable(async move {
                    tokio::task::spawn_blocking(move || {
                        let mut buf = Vec::new();
                        read_chunk(&path, &span, &mut buf).map(|()| buf)
                    })
                    .await
                    .map_err(|e| ClientError::Protocol(format!("chunk read task failed: {e}")))?
                    .map_err(ClientError::from)
                })
                .await?;
            let bytes = data.len() as u64;

            let query = ChunkQuery {
                content_fingerprint: fingerprint.clone(),
                chunk_digest: digest.clone(),
                chunk_index: Some(span.index),
            };
            let resp = self
                .cancellable(self.transport.upload_chunk(&query, data))
                .await?;
            sent.insert(digest);

            if resp.completed {
                debug!(fingerprint = %fingerprint, "store merged upload");
                return resp.file_id.ok_or_else(|| {
                    ClientError::Protocol("upload completed without a file id".into())
                });
            }

            on_update(ProtocolUpdate::ChunkSent {
                uploaded: job.uploaded_count(&resp.remaining_chunk_digests),
                remaining: resp.remaining_chunk_digests.clone(),
                bytes,
            });
            pending = resp.remaining_chunk_digests.into();
        }

        Err(ClientError::Protocol(
            "all chunks sent but store did not complete the upload".into(),
        ))
    }

    fn check_cancelled(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Races `fut` against the cancellation token.
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            result = fut => result,
        }
    }
}
