use serde::{Deserialize, Serialize};

/// Chunk-level progress of an upload session.
///
/// Counts are chunk positions, so a digest that appears twice in a file
/// counts twice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub uploaded: usize,
    pub total: usize,
    pub percentage: f64,
}

impl ChunkProgress {
    pub fn new(uploaded: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            uploaded as f64 / total as f64 * 100.0
        };
        Self {
            uploaded,
            total,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded == self.total
    }
}
