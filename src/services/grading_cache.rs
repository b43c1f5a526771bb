use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::schemas::grading::GradingRecord;

/// Lowercase hex SHA-256 of the submission's exact UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ContentFingerprint(String);

impl ContentFingerprint {
    pub(crate) fn of(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub(crate) enum CacheError {
    #[error("failed to persist grading cache to {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to serialize grading cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fingerprint -> record map shared by all workers.
///
/// Process-scoped unless opened with a file, in which case every mutation rewrites it.
#[derive(Debug, Default)]
pub(crate) struct GradingCache {
    entries: RwLock<HashMap<String, GradingRecord>>,
    path: Option<PathBuf>,
}

impl GradingCache {
    pub(crate) fn in_memory() -> Self {
        Self::default()
    }

    /// Loads a persisted cache. An unreadable file is logged and replaced by an empty cache.
    pub(crate) async fn open(path: &Path) -> Self {
        let entries = match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, GradingRecord>>(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Ignoring unreadable grading cache"
                    );
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to read grading cache"
                );
                HashMap::new()
            }
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Grading cache loaded");
        Self { entries: RwLock::new(entries), path: Some(path.to_path_buf()) }
    }

    pub(crate) async fn lookup(&self, fingerprint: &ContentFingerprint) -> Option<GradingRecord> {
        self.entries.read().await.get(fingerprint.as_str()).cloned()
    }

    /// Overwrites any prior entry for the same fingerprint.
    pub(crate) async fn store(
        &self,
        fingerprint: &ContentFingerprint,
        record: GradingRecord,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(fingerprint.as_str().to_string(), record);
        self.persist(&entries).await
    }

    pub(crate) async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.persist(&entries).await
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn persist(&self, entries: &HashMap<String, GradingRecord>) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(entries)?;
        crate::core::fs::write_atomic(path, &bytes)
            .await
            .map_err(|source| CacheError::Io { path: path.display().to_string(), source })
    }
}
