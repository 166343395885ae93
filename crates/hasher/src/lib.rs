//! Content hashing for chunked uploads.
//!
//! A file is split into fixed-size chunks, every chunk is digested with MD5
//! on a short-lived pool of worker threads, and the ordered chunk digests are
//! folded into one content fingerprint that serves as the dedup key.

mod chunked;
mod fingerprint;
mod kernel;
mod pool;
mod validation;

pub use chunked::{ChunkSpan, plan_chunks, read_chunk};
pub use fingerprint::{FileFingerprint, Fingerprinter, combine_digests};
pub use kernel::{DIGEST_LEN, Md5Kernel, md5_bytes, md5_hex, md5_text};
pub use pool::HashPool;
pub use validation::validate_digest;

/// Default chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Errors produced by the hasher crate.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}
