use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::{DEFAULT_CHUNK_SIZE, HashError};

/// Byte range of one chunk within its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub offset: u64,
    pub len: usize,
}

/// Splits `file_size` bytes into consecutive spans of `chunk_size`.
///
/// The last span may be shorter. An empty file yields a single zero-length
/// span, never an empty plan. A `chunk_size` of 0 means [`DEFAULT_CHUNK_SIZE`].
pub fn plan_chunks(file_size: u64, chunk_size: usize) -> Vec<ChunkSpan> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };

    if file_size == 0 {
        return vec![ChunkSpan {
            index: 0,
            offset: 0,
            len: 0,
        }];
    }

    let step = chunk_size as u64;
    let count = file_size.div_ceil(step);
    (0..count)
        .map(|i| {
            let offset = i * step;
            ChunkSpan {
                index: i as usize,
                offset,
                len: (file_size - offset).min(step) as usize,
            }
        })
        .collect()
}

/// Reads exactly the bytes of `span` from `path` into `buf`.
///
/// A file that shrank since it was planned surfaces as an
/// `UnexpectedEof` I/O error.
pub fn read_chunk(path: &Path, span: &ChunkSpan, buf: &mut Vec<u8>) -> Result<(), HashError> {
    buf.clear();
    buf.resize(span.len, 0);
    if span.len == 0 {
        return Ok(());
    }
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(span.offset))?;
    file.read_exact(buf)?;
    Ok(())
}
