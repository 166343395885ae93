use serde::{Deserialize, Serialize};

use crate::types::ChunkProgress;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First request of every upload: announces the file and its chunk layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub content_fingerprint: String,
    pub chunk_digests: Vec<String>,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Store's answer to a handshake.
///
/// `already_complete` with a `file_id` is the instant-upload path. Otherwise
/// `missing_chunk_digests` lists what the client still has to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub already_complete: bool,
    #[serde(default)]
    pub missing_chunk_digests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl HandshakeResponse {
    pub fn complete(file_id: impl Into<String>) -> Self {
        Self {
            already_complete: true,
            missing_chunk_digests: Vec::new(),
            file_id: Some(file_id.into()),
        }
    }

    pub fn missing(digests: Vec<String>) -> Self {
        Self {
            already_complete: false,
            missing_chunk_digests: digests,
            file_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Query string of a chunk upload. The body carries the raw chunk bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub content_fingerprint: String,
    pub chunk_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    #[serde(default)]
    pub remaining_chunk_digests: Vec<String>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub progress: ChunkProgress,
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub content_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
}

/// Body of the health route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}
