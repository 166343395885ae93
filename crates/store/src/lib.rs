//! Store side of resumable, deduplicating uploads.
//!
//! [`UploadService`] answers handshakes, accepts chunks and cancels uploads.
//! Sessions persist through a [`SessionStore`]; completed sessions are
//! reassembled by the [`MergeEngine`] and registered with the
//! [`FileCatalog`] and [`QuotaLedger`] collaborators.

pub mod catalog;
pub mod error;
pub mod layout;
pub mod locks;
pub mod merge;
pub mod receiver;
pub mod session;

pub use catalog::{
    FileCatalog, FileRecord, MemoryCatalog, MemoryQuota, NewFileRecord, QuotaLedger,
    unique_file_name,
};
pub use error::StoreError;
pub use layout::StorageLayout;
pub use locks::KeyedLocks;
pub use merge::{MergeEngine, MergedObject, assemble_chunks, damaged_chunks};
pub use receiver::UploadService;
pub use session::{FsSessionStore, MemorySessionStore, SessionStore, StoreFuture, UploadSession};
