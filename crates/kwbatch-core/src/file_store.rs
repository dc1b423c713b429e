//! Bounded on-disk cache store.
//!
//! Entries are held in memory in recency order (oldest first) and the whole
//! set is rewritten to a JSON file on every mutation, via a temp file and a
//! rename so readers never see a half-written snapshot. Mutations are applied
//! to a copy and only swapped in once the snapshot is on disk, so a failed
//! write leaves memory and file in agreement. A read moves the entry to the
//! back, so eviction drops the least recently used entry first.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::{CacheEntry, CacheStore};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct FileStore {
    path: Arc<PathBuf>,
    max_entries: usize,
    entries: Arc<Mutex<VecDeque<CacheEntry>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStoreStats {
    pub path: String,
    pub entries: usize,
    pub expired: usize,
    pub max_entries: usize,
}

impl FileStore {
    /// Load the snapshot at `path`, or start empty if it is missing or unreadable JSON.
    pub async fn open(path: impl AsRef<Path>, max_entries: usize) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let max_entries = max_entries.max(1);

        let mut entries: VecDeque<CacheEntry> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => VecDeque::new(),
            Ok(bytes) => match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
                Ok(loaded) => loaded.into(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Cache file is corrupt, starting empty"
                    );
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e.into()),
        };

        entries.retain(|entry| !entry.is_expired());
        while entries.len() > max_entries {
            entries.pop_front();
        }

        tracing::debug!(path = %path.display(), entries = entries.len(), "Cache file loaded");

        Ok(Self {
            path: Arc::new(path),
            max_entries,
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> FileStoreStats {
        let entries = self.entries.lock().await;
        FileStoreStats {
            path: self.path.display().to_string(),
            entries: entries.len(),
            expired: entries.iter().filter(|e| e.is_expired()).count(),
            max_entries: self.max_entries,
        }
    }

    /// Drop expired entries and rewrite the file. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, AppError> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.retain(|entry| !entry.is_expired());
        let removed = entries.len() - next.len();
        if removed > 0 {
            self.persist(&next).await?;
            *entries = next;
        }
        Ok(removed)
    }

    /// Caller must hold the entries lock.
    async fn persist(&self, entries: &VecDeque<CacheEntry>) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(entries)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.path.as_path()).await?;
        Ok(())
    }
}

impl CacheStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let mut entries = self.entries.lock().await;
        let Some(pos) = entries.iter().position(|e| e.key == key) else {
            return Ok(None);
        };
        let Some(entry) = entries.remove(pos) else {
            return Ok(None);
        };
        if entry.is_expired() {
            return Ok(None);
        }
        entries.push_back(entry.clone());
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.retain(|e| e.key != entry.key);
        while next.len() >= self.max_entries {
            next.pop_front();
        }
        next.push_back(entry);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let mut entries = self.entries.lock().await;
        let Some(pos) = entries.iter().position(|e| e.key == key) else {
            return Ok(false);
        };
        let mut next = entries.clone();
        next.remove(pos);
        self.persist(&next).await?;
        *entries = next;
        Ok(true)
    }
}
