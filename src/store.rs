//! Object-store access used by the purge and ingest-check tools.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;

/// Most keys a single delete call accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Object-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("object store I/O error: {0}")]
    Io(#[from] io::Error),

    /// A delete call exceeded [`MAX_DELETE_BATCH`].
    #[error("delete batch of {size} keys exceeds the limit of {MAX_DELETE_BATCH}")]
    BatchTooLarge {
        /// Keys submitted.
        size: usize,
    },
}

/// Per-key result of a delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Keys removed.
    pub deleted: Vec<String>,
    /// Keys the store reported as not deleted.
    pub failed: Vec<String>,
}

/// Listing and batch deletion over a flat key space.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key starting with `prefix`, across all pages.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes up to [`MAX_DELETE_BATCH`] keys, reporting per-key failures.
    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteOutcome, StoreError>;
}

/// [`ObjectStore`] over a directory that mirrors a bucket. Keys are
/// `/`-separated paths relative to the root.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        safe.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = format!("{key_prefix}{name}");
                if entry.file_type().await?.is_dir() {
                    let dir_key = format!("{key}/");
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), dir_key));
                    }
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<DeleteOutcome, StoreError> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StoreError::BatchTooLarge { size: keys.len() });
        }
        let mut outcome = DeleteOutcome::default();
        for key in keys {
            let Some(path) = self.path_for(key) else {
                outcome.failed.push(key.clone());
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => outcome.deleted.push(key.clone()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    outcome.deleted.push(key.clone())
                }
                Err(_) => outcome.failed.push(key.clone()),
            }
        }
        Ok(outcome)
    }
}
