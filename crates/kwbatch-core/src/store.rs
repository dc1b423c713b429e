//! Cache store backends.
//!
//! - [`MemoryStore`]: moka-backed in-process store, the primary backend.
//! - [`FileStore`]: bounded JSON snapshot on disk, the fallback.
//! - [`TieredStore`]: memory front over the durable file, written through.

use std::fmt;
use std::time::Duration;

use moka::future::Cache;

use crate::cache::{CacheEntry, CacheStore};
use crate::config::{CacheBackend, CacheConfig};
use crate::error::AppError;

pub use crate::file_store::{FileStore, FileStoreStats};

/// In-process store with a capacity bound and TTL eviction.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.invalidate(key).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), AppError> {
        self.cache.insert(entry.key.clone(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.cache.remove(key).await.is_some())
    }
}

/// Primary store in front of a durable fallback.
///
/// Writes and deletes go to both tiers. Reads try the primary first; a miss
/// or error there reads the fallback and promotes the hit into the primary,
/// so entries survive a restart. With no primary every operation goes
/// straight to the fallback.
#[derive(Debug, Clone)]
pub struct TieredStore<P: CacheStore, F: CacheStore> {
    primary: Option<P>,
    fallback: F,
}

impl<P: CacheStore, F: CacheStore> TieredStore<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    pub fn fallback_only(fallback: F) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    pub fn primary(&self) -> Option<&P> {
        self.primary.as_ref()
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    fn log_fallback(&self, op: &str, primary: &P, error: &AppError) {
        tracing::warn!(
            primary = primary.name(),
            fallback = self.fallback.name(),
            op,
            error = %error,
            "Primary cache store failed, using fallback"
        );
    }
}

impl TieredStore<MemoryStore, FileStore> {
    /// Build the configured backend. Fails only if the fallback file cannot be read.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, AppError> {
        let file = FileStore::open(&config.file_path, config.max_file_entries).await?;
        let store = match config.backend {
            CacheBackend::Memory => {
                Self::new(MemoryStore::new(config.primary_capacity, config.ttl), file)
            }
            CacheBackend::File => Self::fallback_only(file),
        };
        tracing::info!(
            backend = %config.backend,
            file = %config.file_path.display(),
            ttl_secs = config.ttl.as_secs(),
            "Cache store ready"
        );
        Ok(store)
    }
}

impl<P: CacheStore, F: CacheStore> CacheStore for TieredStore<P, F> {
    fn name(&self) -> &'static str {
        match self.primary {
            Some(_) => "tiered",
            None => self.fallback.name(),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let Some(primary) = &self.primary else {
            return self.fallback.get(key).await;
        };
        let primary_ok = match primary.get(key).await {
            Ok(Some(entry)) => return Ok(Some(entry)),
            Ok(None) => true,
            Err(e) => {
                self.log_fallback("get", primary, &e);
                false
            }
        };
        let found = self.fallback.get(key).await?;
        if primary_ok && let Some(entry) = &found {
            if let Err(e) = primary.put(entry.clone()).await {
                self.log_fallback("promote", primary, &e);
            }
        }
        Ok(found)
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), AppError> {
        let Some(primary) = &self.primary else {
            return self.fallback.put(entry).await;
        };
        let primary_result = primary.put(entry.clone()).await;
        if let Err(e) = &primary_result {
            self.log_fallback("put", primary, e);
        }
        match self.fallback.put(entry).await {
            Ok(()) => Ok(()),
            // The entry is still served from memory; only durability is lost.
            Err(e) if primary_result.is_ok() => {
                tracing::warn!(
                    fallback = self.fallback.name(),
                    error = %e,
                    "Durable cache write failed"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let from_primary = match &self.primary {
            Some(primary) => match primary.delete(key).await {
                Ok(removed) => removed,
                Err(e) => {
                    self.log_fallback("delete", primary, &e);
                    false
                }
            },
            None => false,
        };
        let from_fallback = self.fallback.delete(key).await?;
        Ok(from_primary || from_fallback)
    }
}
