//! Wire protocol shared by the upload client and the store.
//!
//! Three request/response pairs make up an upload: handshake, chunk and
//! cancel. All JSON bodies use camelCase field names.

pub mod constants;
pub mod error;
pub mod messages;
pub mod types;

pub use constants::CHUNK_SIZE;
pub use error::{ApiError, ErrorCode};
pub use messages::{
    CancelRequest, CancelResponse, ChunkQuery, ChunkResponse, HandshakeRequest,
    HandshakeResponse, HealthResponse,
};
pub use types::ChunkProgress;
