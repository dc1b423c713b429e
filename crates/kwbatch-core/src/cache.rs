//! Keyword result cache.
//!
//! [`MetricCache`] is the only place that knows the key layout
//! (`keyword:<normalized keyword>`) and the TTL. Storage sits behind
//! [`CacheStore`]; backend failures are logged and read as misses so the
//! batch path never fails because of the cache.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Keyword, MetricResult};

/// Namespace prefix for keyword result keys.
pub const KEY_PREFIX: &str = "keyword:";

pub fn cache_key(keyword: &Keyword) -> String {
    format!("{KEY_PREFIX}{keyword}")
}

/// A cached value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: MetricResult,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: String, value: MetricResult, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(36_500));
        Self {
            key,
            value,
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Key-value storage for cache entries.
///
/// Implementations must never return an entry past its `expires_at`.
pub trait CacheStore: Send + Sync + Clone + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<CacheEntry>, AppError>> + Send;

    fn put(&self, entry: CacheEntry) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Returns whether an entry was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// TTL cache of per-keyword results.
#[derive(Debug, Clone)]
pub struct MetricCache<S: CacheStore> {
    store: S,
    ttl: Duration,
}

impl<S: CacheStore> MetricCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cached result for `keyword`, or `None` on miss, expiry or backend error.
    pub async fn get(&self, keyword: &Keyword) -> Option<MetricResult> {
        match self.store.get(&cache_key(keyword)).await {
            Ok(Some(entry)) if !entry.is_expired() => Some(entry.value),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    %keyword,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    /// Write-through with the configured TTL. Failures are logged and swallowed.
    pub async fn put(&self, result: &MetricResult) {
        let entry = CacheEntry::new(cache_key(&result.keyword), result.clone(), self.ttl);
        if let Err(e) = self.store.put(entry).await {
            tracing::warn!(
                store = self.store.name(),
                keyword = %result.keyword,
                error = %e,
                "Cache write failed"
            );
        }
    }

    pub async fn invalidate(&self, keyword: &Keyword) -> bool {
        match self.store.delete(&cache_key(keyword)).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    %keyword,
                    error = %e,
                    "Cache delete failed"
                );
                false
            }
        }
    }

    pub async fn contains(&self, keyword: &Keyword) -> bool {
        self.get(keyword).await.is_some()
    }

    /// Split `keywords` into cached results and keywords that need fetching.
    /// Misses keep input order.
    pub async fn partition(
        &self,
        keywords: &[Keyword],
    ) -> (HashMap<Keyword, MetricResult>, Vec<Keyword>) {
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for keyword in keywords {
            match self.get(keyword).await {
                Some(result) => {
                    hits.insert(keyword.clone(), result);
                }
                None => misses.push(keyword.clone()),
            }
        }
        (hits, misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testutil::*;

    fn cache() -> MetricCache<MemoryStore> {
        MetricCache::new(MemoryStore::new(100, Duration::from_secs(60)), Duration::from_secs(60))
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(cache_key(&kw("Rust Lang")), "keyword:rust lang");
    }

    #[test]
    fn entry_expiry() {
        let entry = CacheEntry::new(
            "keyword:a".into(),
            MetricResult::empty(kw("a")),
            Duration::from_secs(10),
        );
        assert!(!entry.is_expired());
        assert!(entry.is_expired_at(Utc::now() + TimeDelta::seconds(11)));
    }

    #[tokio::test]
    async fn put_then_get() {
        let cache = cache();
        let result = MetricResult::new(kw("alpha"), Some(10), Some(50.0));
        cache.put(&result).await;

        assert_eq!(cache.get(&kw("alpha")).await, Some(result));
        assert!(cache.contains(&kw("alpha")).await);
        assert!(!cache.contains(&kw("beta")).await);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = cache();
        cache.put(&MetricResult::new(kw("alpha"), Some(1), None)).await;

        assert!(cache.invalidate(&kw("alpha")).await);
        assert!(!cache.contains(&kw("alpha")).await);
        assert!(!cache.invalidate(&kw("alpha")).await);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = MetricCache::new(
            MemoryStore::new(100, Duration::from_secs(60)),
            Duration::from_millis(20),
        );
        cache.put(&MetricResult::new(kw("alpha"), Some(1), None)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get(&kw("alpha")).await, None);
    }

    #[tokio::test]
    async fn backend_errors_read_as_misses() {
        let cache = MetricCache::new(FailingStore, Duration::from_secs(60));
        cache.put(&MetricResult::new(kw("alpha"), Some(1), None)).await;

        assert_eq!(cache.get(&kw("alpha")).await, None);
        assert!(!cache.invalidate(&kw("alpha")).await);
    }

    #[tokio::test]
    async fn partition_keeps_miss_order() {
        let cache = cache();
        cache.put(&MetricResult::new(kw("b"), Some(2), None)).await;

        let (hits, misses) = cache.partition(&[kw("c"), kw("b"), kw("a")]).await;

        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key(&kw("b")));
        assert_eq!(misses, vec![kw("c"), kw("a")]);
    }
}
