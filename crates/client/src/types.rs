//! Public types for the upload queue.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use chunkvault_protocol::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued for a free upload slot.
    Waiting,
    /// Handshake or chunk transfer in flight.
    Uploading,
    /// Stopped by the user; the store keeps its session.
    Paused,
    /// Stored; `result_file_id` is set.
    Success,
    /// Failed; `last_error` is set and `retry` re-queues it.
    Error,
}

impl TaskStatus {
    /// Whether `clear_completed` removes tasks in this state.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Snapshot of one upload task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub id: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub content_fingerprint: String,
    pub chunk_digests: Vec<String>,
    pub status: TaskStatus,
    pub total_chunks: usize,
    pub uploaded_chunk_count: usize,
    pub remaining_chunk_digests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl UploadTask {
    /// Upload progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.uploaded_chunk_count as f64 / self.total_chunks as f64 * 100.0
    }
}

/// Per-file options for [`UploadQueue::add_file`](crate::UploadQueue::add_file).
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Overrides the name taken from the path.
    pub file_name: Option<String>,
    pub destination_folder_id: Option<String>,
    pub mime_type: Option<String>,
}

/// Events emitted by the upload queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    TaskAdded {
        task_id: String,
    },
    StatusChanged {
        task_id: String,
        status: TaskStatus,
    },
    Progress {
        task_id: String,
        uploaded: usize,
        total: usize,
        bytes_per_second: f64,
    },
    Completed {
        task_id: String,
        file_id: String,
    },
    Failed {
        task_id: String,
        error: String,
    },
    Removed {
        task_id: String,
    },
}

/// Queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum tasks in `Uploading` at once (at least 1).
    pub max_concurrent: usize,
    pub chunk_size: usize,
    /// Hash worker threads; `None` uses available parallelism.
    pub hash_workers: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            chunk_size: CHUNK_SIZE,
            hash_workers: None,
        }
    }
}
