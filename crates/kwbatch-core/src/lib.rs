pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod file_store;
pub mod job;
pub mod job_manager;
pub mod models;
pub mod retry;
pub mod store;
pub mod throttle;
pub mod traits;
pub mod worker;

mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use batch::{BatchConfig, BatchOrchestrator, Timeouts};
pub use cache::{CacheEntry, CacheStore, MetricCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{AdsClient, CallGuard, TrendsClient};
pub use config::{CacheBackend, CacheConfig, EngineConfig};
pub use error::AppError;
pub use job::{JobSnapshot, JobStatus, KeywordStatus};
pub use job_manager::{JobConfig, JobManager, SubmitReceipt};
pub use models::{Keyword, MetricResult, Provider};
pub use store::{FileStore, MemoryStore, TieredStore};
pub use traits::{BulkMetricsProvider, CredentialSupplier, Credentials, TrendScoreProvider};
pub use worker::{TracingWorkerReporter, WorkerReporter};
