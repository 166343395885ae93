//! Server configuration.
//!
//! Stored as TOML, `chunkvault-server.toml` in the working directory unless
//! `--config` points elsewhere. Every field has a default, so a missing file
//! or a partial one is fine.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkvault_protocol::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "chunkvault-server.toml";

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory holding sessions, chunks and merged objects.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Bytes each owner may store.
    #[serde(default = "default_quota")]
    pub quota_bytes_per_owner: u64,

    /// Largest accepted chunk body.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1:8787".into()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_quota() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_max_chunk_bytes() -> usize {
    CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            storage_root: default_storage_root(),
            quota_bytes_per_owner: default_quota(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}
