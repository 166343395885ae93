//! Store error types.

use chunkvault_hasher::HashError;
use chunkvault_protocol::{ApiError, ErrorCode};

/// Errors produced while handling uploads on the store side.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no upload session for {0}")]
    UnknownSession(String),

    #[error("chunk {digest} is not part of upload {fingerprint}")]
    UnexpectedChunk { fingerprint: String, digest: String },

    #[error("chunk digest mismatch: declared {declared}, computed {computed}")]
    ChunkDigestMismatch { declared: String, computed: String },

    #[error("chunk list does not match upload {0}")]
    ChunkListMismatch(String),

    #[error("upload {0} belongs to another owner")]
    SessionOwnedByOther(String),

    #[error("upload {0} was cancelled while the request was in flight")]
    UploadCancelled(String),

    #[error("insufficient storage for {requested} bytes")]
    QuotaExceeded { requested: u64 },

    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Machine-readable code for the wire error body.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDigest(_) => ErrorCode::InvalidDigest,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::UnknownSession(_) => ErrorCode::UnknownSession,
            Self::UnexpectedChunk { .. } => ErrorCode::UnexpectedChunk,
            Self::ChunkDigestMismatch { .. } => ErrorCode::ChunkDigestMismatch,
            Self::ChunkListMismatch(_) => ErrorCode::ChunkListMismatch,
            Self::SessionOwnedByOther(_) => ErrorCode::SessionOwnedByOther,
            Self::UploadCancelled(_) => ErrorCode::UploadCancelled,
            Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::IntegrityFailure(_) => ErrorCode::IntegrityFailure,
            Self::Io(_) | Self::Serialization(_) | Self::Catalog(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// HTTP status equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidDigest(_)
            | Self::InvalidRequest(_)
            | Self::UnexpectedChunk { .. }
            | Self::ChunkDigestMismatch { .. } => 400,
            Self::SessionOwnedByOther(_) => 403,
            Self::UnknownSession(_) => 404,
            Self::ChunkListMismatch(_) | Self::UploadCancelled(_) => 409,
            Self::QuotaExceeded { .. } => 413,
            Self::IntegrityFailure(_) => 422,
            Self::Io(_) | Self::Serialization(_) | Self::Catalog(_) | Self::Internal(_) => 500,
        }
    }

    /// True for errors caused by the request rather than by the store.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.code(), self.to_string())
    }
}

impl From<HashError> for StoreError {
    fn from(e: HashError) -> Self {
        match e {
            HashError::Io(e) => Self::Io(e),
            HashError::InvalidDigest(msg) => Self::InvalidDigest(msg),
            HashError::Pool(msg) => Self::Internal(msg),
        }
    }
}
