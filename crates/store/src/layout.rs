use std::path::{Path, PathBuf};

/// On-disk layout under the storage root.
///
/// ```text
/// <root>/temp/<fingerprint>.json            session record
/// <root>/temp/chunks/<fingerprint>/<digest> received chunk bytes
/// <root>/objects/<fingerprint>              merged object
/// ```
///
/// Callers validate fingerprints and digests before building paths.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn session_path(&self, fingerprint: &str) -> PathBuf {
        self.temp_dir().join(format!("{fingerprint}.json"))
    }

    pub fn chunk_dir(&self, fingerprint: &str) -> PathBuf {
        self.temp_dir().join("chunks").join(fingerprint)
    }

    pub fn chunk_path(&self, fingerprint: &str, digest: &str) -> PathBuf {
        self.chunk_dir(fingerprint).join(digest)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn object_path(&self, fingerprint: &str) -> PathBuf {
        self.objects_dir().join(fingerprint)
    }

    pub fn partial_object_path(&self, fingerprint: &str) -> PathBuf {
        self.objects_dir().join(format!("{fingerprint}.partial"))
    }

    /// Creates the top-level directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.temp_dir().join("chunks")).await?;
        tokio::fs::create_dir_all(self.objects_dir()).await
    }
}
