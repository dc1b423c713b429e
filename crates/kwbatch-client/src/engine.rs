use kwbatch_core::error::AppError;
use kwbatch_core::models::Provider;
use kwbatch_core::store::{FileStore, MemoryStore, TieredStore};
use kwbatch_core::traits::CredentialSupplier;
use kwbatch_core::{AdsClient, BatchOrchestrator, EngineConfig, MetricCache, TrendsClient};

use crate::ads::HttpBulkMetricsProvider;
use crate::config::ClientConfig;
use crate::trends::HttpTrendScoreProvider;

/// Cache store used by the binaries.
pub type EngineStore = TieredStore<MemoryStore, FileStore>;

/// Orchestrator over the HTTP adapters.
pub type HttpOrchestrator =
    BatchOrchestrator<HttpBulkMetricsProvider, HttpTrendScoreProvider, EngineStore>;

/// Assemble the orchestrator: credentials, adapters, guards and cache.
///
/// Fails if credentials are missing or the fallback cache file cannot be opened.
pub async fn build_orchestrator(
    engine: &EngineConfig,
    clients: &ClientConfig,
    credentials: &dyn CredentialSupplier,
) -> Result<HttpOrchestrator, AppError> {
    let ads = HttpBulkMetricsProvider::new(&clients.ads, credentials.credentials(Provider::Ads)?)?;
    let trends =
        HttpTrendScoreProvider::new(&clients.trends, credentials.credentials(Provider::Trends)?)?;

    let limiter = engine.rate_limiter();
    let store = TieredStore::from_config(&engine.cache).await?;

    Ok(BatchOrchestrator::new(
        AdsClient::new(ads, engine.call_guard(Provider::Ads, &limiter)),
        TrendsClient::new(trends, engine.call_guard(Provider::Trends, &limiter)),
        MetricCache::new(store, engine.cache.ttl),
        engine.batch.clone(),
    ))
}
