use std::sync::Arc;

use kwbatch_core::{BatchOrchestrator, BulkMetricsProvider, CacheStore, JobManager, TrendScoreProvider};

/// Shared application state, available to all route handlers via `State<Arc<AppState<..>>>`.
pub struct AppState<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    pub orchestrator: Arc<BatchOrchestrator<B, T, S>>,
    pub jobs: Arc<JobManager<B, T, S>>,
}

impl<B, T, S> AppState<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    pub fn new(
        orchestrator: Arc<BatchOrchestrator<B, T, S>>,
        jobs: Arc<JobManager<B, T, S>>,
    ) -> Self {
        Self { orchestrator, jobs }
    }
}
