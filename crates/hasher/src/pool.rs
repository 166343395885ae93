use std::num::NonZeroUsize;

use rayon::prelude::*;
use tracing::debug;

use crate::HashError;
use crate::kernel::Md5Kernel;

/// A fixed-size set of hashing threads.
///
/// Built for one fingerprinting run and dropped afterwards; dropping the
/// pool joins its threads. Each task body gets its own [`Md5Kernel`], so no
/// digest state is shared between chunks.
pub struct HashPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl HashPool {
    /// Creates a pool with `workers` threads.
    ///
    /// `None` means one thread per available core. The count is clamped to
    /// at least 1.
    pub fn new(workers: Option<usize>) -> Result<Self, HashError> {
        let workers = workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("chunkvault-hash-{i}"))
            .build()
            .map_err(|e| HashError::Pool(format!("failed to build hash pool: {e}")))?;
        debug!(workers, "hash pool started");
        Ok(Self { pool, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Digests each buffer, returning hex digests in input order.
    pub fn digest_buffers<B>(&self, buffers: &[B]) -> Result<Vec<String>, HashError>
    where
        B: AsRef<[u8]> + Sync,
    {
        self.digest_with(buffers.len(), |i, buf| {
            buf.clear();
            buf.extend_from_slice(buffers[i].as_ref());
            Ok(())
        })
    }

    /// Digests `count` chunks whose bytes are produced on demand by `load`.
    ///
    /// `load(index, buf)` fills `buf` with chunk `index`. The buffer is reused
    /// by the same worker for its next chunk, so at most one chunk per worker
    /// is resident at a time. Results are indexed by position, not by
    /// completion order. The first error aborts the whole run.
    pub fn digest_with<F>(&self, count: usize, load: F) -> Result<Vec<String>, HashError>
    where
        F: Fn(usize, &mut Vec<u8>) -> Result<(), HashError> + Sync,
    {
        self.pool.install(|| {
            (0..count)
                .into_par_iter()
                .map_init(
                    || (Md5Kernel::new(), Vec::new()),
                    |(kernel, buf), index| -> Result<String, HashError> {
                        load(index, buf)?;
                        kernel.reset();
                        kernel.update(buf.as_slice());
                        Ok(kernel.finalize_to_hex())
                    },
                )
                .collect()
        })
    }
}
