use std::path::Path;
use std::time::Instant;

use tracing::debug;

use crate::chunked::{ChunkSpan, plan_chunks, read_chunk};
use crate::kernel::Md5Kernel;
use crate::pool::HashPool;
use crate::{DEFAULT_CHUNK_SIZE, HashError};

/// Folds ordered chunk digests into one content fingerprint.
///
/// The fingerprint is the MD5 of the concatenated lowercase hex chunk
/// digests. Reordering the chunks changes the result.
pub fn combine_digests<S: AsRef<str>>(digests: &[S]) -> String {
    let mut kernel = Md5Kernel::new();
    for digest in digests {
        kernel.update(digest.as_ref().as_bytes());
    }
    kernel.finalize_to_hex()
}

/// Chunk layout and digests of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub fingerprint: String,
    pub chunk_digests: Vec<String>,
    pub spans: Vec<ChunkSpan>,
    pub file_size: u64,
    pub chunk_size: usize,
}

impl FileFingerprint {
    pub fn chunk_count(&self) -> usize {
        self.chunk_digests.len()
    }

    /// Span of the first chunk with the given digest.
    ///
    /// Chunks with equal digests have equal bytes, so any of them will do.
    pub fn span_of(&self, digest: &str) -> Option<&ChunkSpan> {
        self.chunk_digests
            .iter()
            .position(|d| d == digest)
            .map(|i| &self.spans[i])
    }
}

/// Computes [`FileFingerprint`]s with a fixed chunk-size policy.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    chunk_size: usize,
    workers: Option<usize>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Fingerprinter {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            chunk_size,
            workers: None,
        }
    }

    /// Overrides the hash worker count (default: available parallelism).
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fingerprints a file on disk. Blocking; run it off the async runtime.
    ///
    /// Chunks are read lazily by the workers, so memory use is bounded by
    /// worker count times chunk size. The pool lives only for this call.
    pub fn fingerprint_file(&self, path: &Path) -> Result<FileFingerprint, HashError> {
        let started = Instant::now();
        let file_size = std::fs::metadata(path)?.len();
        let spans = plan_chunks(file_size, self.chunk_size);

        let pool = HashPool::new(self.workers)?;
        let chunk_digests =
            pool.digest_with(spans.len(), |i, buf| read_chunk(path, &spans[i], buf))?;
        drop(pool);

        let fingerprint = combine_digests(&chunk_digests);
        debug!(
            path = %path.display(),
            file_size,
            chunks = spans.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fingerprinted file"
        );
        Ok(FileFingerprint {
            fingerprint,
            chunk_digests,
            spans,
            file_size,
            chunk_size: self.chunk_size,
        })
    }

    /// Fingerprints an in-memory buffer.
    pub fn fingerprint_bytes(&self, data: &[u8]) -> Result<FileFingerprint, HashError> {
        let spans = plan_chunks(data.len() as u64, self.chunk_size);
        let pieces: Vec<&[u8]> = spans
            .iter()
            .map(|s| {
                let start = s.offset as usize;
                &data[start..start + s.len]
            })
            .collect();

        let pool = HashPool::new(self.workers)?;
        let chunk_digests = pool.digest_buffers(&pieces)?;
        drop(pool);

        Ok(FileFingerprint {
            fingerprint: combine_digests(&chunk_digests),
            chunk_digests,
            spans,
            file_size: data.len() as u64,
            chunk_size: self.chunk_size,
        })
    }
}
