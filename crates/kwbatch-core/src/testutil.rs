//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::batch::{BatchConfig, BatchOrchestrator};
use crate::cache::{CacheEntry, CacheStore, MetricCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::client::{AdsClient, CallGuard, TrendsClient};
use crate::error::AppError;
use crate::models::{Keyword, Provider};
use crate::retry::RetryPolicy;
use crate::store::MemoryStore;
use crate::throttle::RateLimiter;
use crate::traits::{BulkMetricsProvider, TrendScoreProvider};
use crate::worker::{WorkerEvent, WorkerReporter};

/// Parse a keyword, panicking on invalid input.
pub fn kw(raw: &str) -> Keyword {
    Keyword::parse(raw).unwrap()
}

// ---------------------------------------------------------------------------
// MockBulkProvider
// ---------------------------------------------------------------------------

/// Mock bulk provider that answers from a fixed volume table.
#[derive(Clone, Default)]
pub struct MockBulkProvider {
    volumes: Arc<Mutex<HashMap<Keyword, i64>>>,
    /// Errors returned by the next calls, in order.
    errors: Arc<Mutex<Vec<AppError>>>,
    delay: Option<Duration>,
    /// Keyword lists received, one entry per call.
    requests: Arc<Mutex<Vec<Vec<Keyword>>>>,
}

impl MockBulkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(self, keyword: &str, volume: i64) -> Self {
        self.volumes.lock().unwrap().insert(kw(keyword), volume);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next(self, errors: Vec<AppError>) -> Self {
        self.errors.lock().unwrap().extend(errors);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested(&self) -> Vec<Vec<Keyword>> {
        self.requests.lock().unwrap().clone()
    }
}

impl BulkMetricsProvider for MockBulkProvider {
    async fn fetch_bulk(
        &self,
        keywords: &[Keyword],
    ) -> Result<HashMap<Keyword, Option<i64>>, AppError> {
        self.requests.lock().unwrap().push(keywords.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next_error = {
            let mut errors = self.errors.lock().unwrap();
            if errors.is_empty() {
                None
            } else {
                Some(errors.remove(0))
            }
        };
        if let Some(e) = next_error {
            return Err(e);
        }

        let volumes = self.volumes.lock().unwrap();
        Ok(keywords
            .iter()
            .map(|k| (k.clone(), volumes.get(k).copied()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockTrendProvider
// ---------------------------------------------------------------------------

/// Mock trend provider with per-keyword scores and delays.
#[derive(Clone, Default)]
pub struct MockTrendProvider {
    scores: Arc<Mutex<HashMap<Keyword, f64>>>,
    errors: Arc<Mutex<Vec<AppError>>>,
    delay: Option<Duration>,
    keyword_delays: Arc<Mutex<HashMap<Keyword, Duration>>>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockTrendProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(self, keyword: &str, score: f64) -> Self {
        self.scores.lock().unwrap().insert(kw(keyword), score);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_keyword_delay(self, keyword: &str, delay: Duration) -> Self {
        self.keyword_delays
            .lock()
            .unwrap()
            .insert(kw(keyword), delay);
        self
    }

    pub fn fail_next(self, errors: Vec<AppError>) -> Self {
        self.errors.lock().unwrap().extend(errors);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl TrendScoreProvider for MockTrendProvider {
    async fn fetch_one(&self, keyword: &Keyword) -> Result<Option<f64>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .keyword_delays
            .lock()
            .unwrap()
            .get(keyword)
            .copied()
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next_error = {
            let mut errors = self.errors.lock().unwrap();
            if errors.is_empty() {
                None
            } else {
                Some(errors.remove(0))
            }
        };
        if let Some(e) = next_error {
            return Err(e);
        }

        Ok(self.scores.lock().unwrap().get(keyword).copied())
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// Cache store whose every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

impl CacheStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, AppError> {
        Err(AppError::CacheUnavailable("connection refused".into()))
    }

    async fn put(&self, _entry: CacheEntry) -> Result<(), AppError> {
        Err(AppError::CacheUnavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, AppError> {
        Err(AppError::CacheUnavailable("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records events.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::JobSubmitted { .. } => "JobSubmitted",
            WorkerEvent::ChunkStarted { .. } => "ChunkStarted",
            WorkerEvent::ChunkCompleted { .. } => "ChunkCompleted",
            WorkerEvent::ChunkAbandoned { .. } => "ChunkAbandoned",
            WorkerEvent::JobCompleted { .. } => "JobCompleted",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Call guard with short backoff, no throttling and a fresh breaker.
pub fn test_guard(provider: Provider) -> CallGuard {
    CallGuard::new(
        CircuitBreaker::new(provider, CircuitBreakerConfig::default()),
        RateLimiter::new(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            jitter: 0.2,
            max_delay: Duration::from_millis(50),
        },
    )
}

/// Orchestrator over the given mocks with an in-memory cache and default limits.
pub fn test_orchestrator(
    ads: MockBulkProvider,
    trends: MockTrendProvider,
) -> BatchOrchestrator<MockBulkProvider, MockTrendProvider, MemoryStore> {
    test_orchestrator_with_store(
        ads,
        trends,
        MemoryStore::new(10_000, Duration::from_secs(3600)),
    )
}

pub fn test_orchestrator_with_store<S: CacheStore>(
    ads: MockBulkProvider,
    trends: MockTrendProvider,
    store: S,
) -> BatchOrchestrator<MockBulkProvider, MockTrendProvider, S> {
    BatchOrchestrator::new(
        AdsClient::new(ads, test_guard(Provider::Ads)),
        TrendsClient::new(trends, test_guard(Provider::Trends)),
        MetricCache::new(store, Duration::from_secs(3600)),
        BatchConfig::default(),
    )
}
