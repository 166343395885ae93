//! Metadata and quota collaborators, plus in-memory implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::session::StoreFuture;

/// Upper bound on `name(n).ext` candidates tried by [`unique_file_name`].
pub const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A stored file as seen by its owner.
///
/// Several records may point at one physical `location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub content_fingerprint: String,
    pub location: PathBuf,
    pub size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`FileRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub owner_id: String,
    pub content_fingerprint: String,
    pub location: PathBuf,
    pub size: u64,
    pub name: String,
    pub parent_id: Option<String>,
    pub mime_type: String,
}

/// File metadata store.
pub trait FileCatalog: Send + Sync {
    /// Finds a record holding `fingerprint`, preferring one owned by
    /// `owner_id` and falling back to any owner's.
    fn find_by_fingerprint<'a>(
        &'a self,
        owner_id: &'a str,
        fingerprint: &'a str,
    ) -> StoreFuture<'a, Option<FileRecord>>;

    /// Whether `owner_id` already has a file called `name` in `parent_id`.
    fn name_exists<'a>(
        &'a self,
        owner_id: &'a str,
        parent_id: Option<&'a str>,
        name: &'a str,
    ) -> StoreFuture<'a, bool>;

    fn create_file_record(&self, record: NewFileRecord) -> StoreFuture<'_, FileRecord>;
}

/// Per-owner storage accounting.
pub trait QuotaLedger: Send + Sync {
    fn has_enough_quota<'a>(&'a self, owner_id: &'a str, size: u64) -> StoreFuture<'a, bool>;

    /// Adjusts used space by `delta`. Usage never drops below zero.
    fn add_used_space<'a>(&'a self, owner_id: &'a str, delta: i64) -> StoreFuture<'a, ()>;
}

/// Splits `name` into stem and extension (with its dot).
///
/// A leading dot alone does not start an extension, so `.env` has none.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// Returns `name`, or the first free `stem(n).ext` in the owner's folder.
pub async fn unique_file_name(
    catalog: &dyn FileCatalog,
    owner_id: &str,
    parent_id: Option<&str>,
    name: &str,
) -> Result<String, StoreError> {
    if !catalog.name_exists(owner_id, parent_id, name).await? {
        return Ok(name.to_string());
    }

    let (stem, ext) = split_extension(name);
    let mut candidate = name.to_string();
    for n in 1..=MAX_NAME_ATTEMPTS {
        candidate = format!("{stem}({n}){ext}");
        if !catalog.name_exists(owner_id, parent_id, &candidate).await? {
            break;
        }
    }
    Ok(candidate)
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<Vec<FileRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<FileRecord> {
        self.records.lock().await.clone()
    }

    pub async fn records_for(&self, owner_id: &str) -> Vec<FileRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }
}

impl FileCatalog for MemoryCatalog {
    fn find_by_fingerprint<'a>(
        &'a self,
        owner_id: &'a str,
        fingerprint: &'a str,
    ) -> StoreFuture<'a, Option<FileRecord>> {
        Box::pin(async move {
            let records = self.records.lock().await;
            let mut matching = records
                .iter()
                .filter(|r| r.content_fingerprint == fingerprint);
            let own = matching.clone().find(|r| r.owner_id == owner_id);
            Ok(own.or_else(|| matching.next()).cloned())
        })
    }

    fn name_exists<'a>(
        &'a self,
        owner_id: &'a str,
        parent_id: Option<&'a str>,
        name: &'a str,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            Ok(self.records.lock().await.iter().any(|r| {
                r.owner_id == owner_id && r.parent_id.as_deref() == parent_id && r.name == name
            }))
        })
    }

    fn create_file_record(&self, record: NewFileRecord) -> StoreFuture<'_, FileRecord> {
        Box::pin(async move {
            let created = FileRecord {
                id: uuid::Uuid::new_v4().to_string(),
                owner_id: record.owner_id,
                name: record.name,
                content_fingerprint: record.content_fingerprint,
                location: record.location,
                size: record.size,
                mime_type: record.mime_type,
                parent_id: record.parent_id,
                created_at: Utc::now(),
            };
            self.records.lock().await.push(created.clone());
            Ok(created)
        })
    }
}

/// Fixed per-owner limit with in-memory usage counters.
pub struct MemoryQuota {
    limit: u64,
    used: Mutex<HashMap<String, u64>>,
}

impl MemoryQuota {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Mutex::new(HashMap::new()),
        }
    }

    pub async fn used(&self, owner_id: &str) -> u64 {
        self.used.lock().await.get(owner_id).copied().unwrap_or(0)
    }
}

impl QuotaLedger for MemoryQuota {
    fn has_enough_quota<'a>(&'a self, owner_id: &'a str, size: u64) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let used = self.used(owner_id).await;
            Ok(used.saturating_add(size) <= self.limit)
        })
    }

    fn add_used_space<'a>(&'a self, owner_id: &'a str, delta: i64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut used = self.used.lock().await;
            let entry = used.entry(owner_id.to_string()).or_insert(0);
            *entry = if delta >= 0 {
                entry.saturating_add(delta as u64)
            } else {
                entry.saturating_sub(delta.unsigned_abs())
            };
            Ok(())
        })
    }
}
