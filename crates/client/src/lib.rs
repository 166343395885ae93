//! Client side of resumable, deduplicating uploads.
//!
//! [`UploadQueue`] schedules tasks with bounded concurrency and per-task
//! cancellation. Each task runs the three-phase protocol in
//! [`ProtocolClient`] over an [`UploadTransport`], normally
//! [`HttpTransport`].

pub mod error;
pub mod progress;
pub mod protocol;
pub mod queue;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::ClientError;
pub use progress::SpeedCalculator;
pub use protocol::{ProtocolClient, ProtocolUpdate, UploadJob};
pub use queue::UploadQueue;
pub use transport::{HttpTransport, TransportFuture, UploadTransport};
pub use types::{AddOptions, QueueConfig, QueueEvent, TaskStatus, UploadTask};
