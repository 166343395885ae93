//! Client error types.

use chunkvault_hasher::HashError;
use chunkvault_protocol::{ApiError, ErrorCode};

use crate::types::TaskStatus;

/// Errors produced by the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hashing failed: {0}")]
    Hash(#[from] HashError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store rejected request ({status}): {error}")]
    Api { status: u16, error: ApiError },

    #[error("insufficient storage: {0}")]
    QuotaExceeded(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} cannot do that while {status:?}")]
    InvalidTransition { task_id: String, status: TaskStatus },

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Builds the error for a non-2xx response body.
    pub fn from_api(status: u16, error: ApiError) -> Self {
        if error.code == ErrorCode::QuotaExceeded {
            Self::QuotaExceeded(error.message)
        } else {
            Self::Api { status, error }
        }
    }

    /// Whether resuming the task later may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
