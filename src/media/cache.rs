use super::MediaError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content hash to uploaded URL, persisted as a JSON object.
pub struct UploadCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    // Held from the map update through the rename so snapshots land in order.
    persist: tokio::sync::Mutex<()>,
}

impl UploadCache {
    /// Loads the cache file; a missing file is an empty cache.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, MediaError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "opened upload cache");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            persist: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, hash: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(hash)
            .cloned()
    }

    /// Records `url` for `hash` and rewrites the file.
    pub async fn insert(&self, hash: &str, url: &str) -> Result<(), MediaError> {
        let _persist = self.persist.lock().await;
        let raw = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.insert(hash.to_string(), url.to_string());
            serde_json::to_vec_pretty(&*entries)?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, raw).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}
