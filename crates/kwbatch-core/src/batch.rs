use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::StreamExt;

use crate::cache::{CacheStore, MetricCache};
use crate::client::{AdsClient, TrendsClient};
use crate::error::AppError;
use crate::models::{Keyword, MetricResult, Provider, normalize_batch};
use crate::traits::{BulkMetricsProvider, TrendScoreProvider};

/// Limits for one batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Largest batch accepted after deduplication.
    pub max_keywords: usize,
    /// Concurrent per-keyword trend calls.
    pub fanout: usize,
    pub per_call_timeout: Duration,
    pub global_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_keywords: 200,
            fanout: 10,
            per_call_timeout: Duration::from_secs(30),
            global_timeout: Duration::from_secs(90),
        }
    }
}

/// Time budgets for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub per_call: Duration,
    pub global: Duration,
}

/// Fields collected for one keyword while a batch is in flight.
#[derive(Debug, Default, Clone, Copy)]
struct Partial {
    ads: Option<i64>,
    trends: Option<f64>,
}

/// Resolves a keyword batch: cache first, then both providers in parallel
/// under a global deadline, merging whatever arrived in time.
///
/// Never fails because a provider did: missing values come back as `None`.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    ads: AdsClient<B>,
    trends: TrendsClient<T>,
    cache: MetricCache<S>,
    config: BatchConfig,
}

impl<B, T, S> BatchOrchestrator<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    pub fn new(
        ads: AdsClient<B>,
        trends: TrendsClient<T>,
        cache: MetricCache<S>,
        config: BatchConfig,
    ) -> Self {
        Self {
            ads,
            trends,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetricCache<S> {
        &self.cache
    }

    pub fn ads(&self) -> &AdsClient<B> {
        &self.ads
    }

    pub fn trends(&self) -> &TrendsClient<T> {
        &self.trends
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            per_call: self.config.per_call_timeout,
            global: self.config.global_timeout,
        }
    }

    /// Rough wall-clock estimate for `keywords` uncached keywords.
    ///
    /// Trend calls dominate: they are throttled one at a time per interval,
    /// otherwise limited by the fan-out.
    pub fn estimate_seconds(&self, keywords: usize) -> u64 {
        let interval = self
            .trends
            .guard()
            .limiter()
            .config(Provider::Trends)
            .map(|c| c.interval)
            .unwrap_or_default();
        let per_keyword = if interval.is_zero() {
            1.0 / self.config.fanout.max(1) as f64
        } else {
            interval.as_secs_f64()
        };
        (keywords as f64 * per_keyword).ceil().max(1.0) as u64
    }

    /// Validate and resolve a caller-supplied batch with the configured budgets.
    pub async fn process<K: AsRef<str>>(&self, keywords: &[K]) -> Result<Vec<MetricResult>, AppError> {
        self.process_with(keywords, self.timeouts()).await
    }

    pub async fn process_with<K: AsRef<str>>(
        &self,
        keywords: &[K],
        timeouts: Timeouts,
    ) -> Result<Vec<MetricResult>, AppError> {
        let keywords = normalize_batch(keywords, self.config.max_keywords)?;
        Ok(self.process_keywords(&keywords, timeouts).await)
    }

    /// Resolve already-normalized keywords. Output order matches `keywords`.
    pub async fn process_keywords(
        &self,
        keywords: &[Keyword],
        timeouts: Timeouts,
    ) -> Vec<MetricResult> {
        let started = Instant::now();

        let (mut hits, misses) = self.cache.partition(keywords).await;
        let cache_hits = hits.len();

        let mut fetched = if misses.is_empty() {
            HashMap::new()
        } else {
            self.fetch_misses(&misses, timeouts).await
        };

        for result in fetched.values() {
            // Empty results are usually an outage; keep them out of the cache.
            if !result.is_empty() {
                self.cache.put(result).await;
            }
        }

        let results: Vec<MetricResult> = keywords
            .iter()
            .map(|keyword| {
                hits.remove(keyword)
                    .or_else(|| fetched.remove(keyword))
                    .unwrap_or_else(|| MetricResult::empty(keyword.clone()))
            })
            .collect();

        tracing::info!(
            keywords = keywords.len(),
            cache_hits,
            fetched = misses.len(),
            complete = results.iter().filter(|r| r.is_complete()).count(),
            empty = results.iter().filter(|r| r.is_empty()).count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Batch processed"
        );

        results
    }

    /// Query both providers for `misses`, stopping at the global deadline.
    async fn fetch_misses(
        &self,
        misses: &[Keyword],
        timeouts: Timeouts,
    ) -> HashMap<Keyword, MetricResult> {
        let partials: Mutex<HashMap<Keyword, Partial>> = Mutex::new(
            misses
                .iter()
                .map(|kw| (kw.clone(), Partial::default()))
                .collect(),
        );

        let ads_work = async {
            // Failures are already logged by the client.
            if let Ok(volumes) = self.ads.fetch(misses, timeouts.per_call).await {
                let mut partials = lock(&partials);
                for (keyword, volume) in volumes {
                    if let Some(partial) = partials.get_mut(&keyword) {
                        partial.ads = volume;
                    }
                }
            }
        };

        let trends_work = futures::stream::iter(misses.to_vec())
            .map(|keyword| {
                let client = self.trends.clone();
                async move {
                    let score = client.fetch(&keyword, timeouts.per_call).await;
                    (keyword, score)
                }
            })
            .buffer_unordered(self.config.fanout.max(1))
            .for_each(|(keyword, score)| {
                if let Ok(score) = score
                    && let Some(partial) = lock(&partials).get_mut(&keyword)
                {
                    partial.trends = score;
                }
                futures::future::ready(())
            });

        let work = async {
            tokio::join!(ads_work, trends_work);
        };

        if tokio::time::timeout(timeouts.global, work).await.is_err() {
            let partials = lock(&partials);
            tracing::warn!(
                deadline_ms = timeouts.global.as_millis() as u64,
                pending = misses.len(),
                with_ads = partials.values().filter(|p| p.ads.is_some()).count(),
                with_trends = partials.values().filter(|p| p.trends.is_some()).count(),
                "Batch deadline reached, returning partial results"
            );
        }

        let partials = partials.into_inner().unwrap_or_else(|poisoned| {
            tracing::warn!("Batch results mutex was poisoned, recovering");
            poisoned.into_inner()
        });

        partials
            .into_iter()
            .map(|(keyword, partial)| {
                let result = MetricResult::new(keyword.clone(), partial.ads, partial.trends);
                (keyword, result)
            })
            .collect()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Batch results mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::testutil::*;

    #[tokio::test]
    async fn merges_both_providers_in_input_order() {
        let ads = MockBulkProvider::new()
            .with_volume("alpha", 100)
            .with_volume("beta", 200);
        let trends = MockTrendProvider::new()
            .with_score("alpha", 50.0)
            .with_score("beta", 75.0);
        let orchestrator = test_orchestrator(ads, trends);

        let results = orchestrator.process(&["Beta", "alpha"]).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].keyword, kw("beta"));
        assert_eq!(results[0].ads_avg_monthly_searches, Some(200));
        assert_eq!(results[0].trends_score, Some(75.0));
        assert_eq!(results[1].keyword, kw("alpha"));
        assert_eq!(results[1].ads_avg_monthly_searches, Some(100));
        assert_eq!(results[1].trends_score, Some(50.0));
    }

    #[tokio::test]
    async fn duplicates_collapse_to_one_result() {
        let orchestrator = test_orchestrator(
            MockBulkProvider::new().with_volume("alpha", 1),
            MockTrendProvider::new().with_score("alpha", 1.0),
        );

        let results = orchestrator
            .process(&["alpha", "ALPHA", " alpha "])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_batches_before_any_call() {
        let ads = MockBulkProvider::new();
        let trends = MockTrendProvider::new();
        let orchestrator = test_orchestrator(ads.clone(), trends.clone());

        let empty: [&str; 0] = [];
        assert!(matches!(
            orchestrator.process(&empty).await,
            Err(AppError::Validation(_))
        ));

        let too_many: Vec<String> = (0..201).map(|i| format!("kw{i}")).collect();
        assert!(matches!(
            orchestrator.process(&too_many).await,
            Err(AppError::Validation(_))
        ));

        assert_eq!(ads.calls(), 0);
        assert_eq!(trends.calls(), 0);
    }

    #[tokio::test]
    async fn cached_keywords_skip_providers() {
        let ads = MockBulkProvider::new().with_volume("alpha", 10);
        let trends = MockTrendProvider::new().with_score("alpha", 20.0);
        let orchestrator = test_orchestrator(ads.clone(), trends.clone());

        orchestrator.process(&["alpha"]).await.unwrap();
        let second = orchestrator.process(&["alpha"]).await.unwrap();

        assert_eq!(second[0].ads_avg_monthly_searches, Some(10));
        assert_eq!(second[0].trends_score, Some(20.0));
        assert_eq!(ads.calls(), 1);
        assert_eq!(trends.calls(), 1);
    }

    #[tokio::test]
    async fn only_misses_are_sent_to_providers() {
        let ads = MockBulkProvider::new()
            .with_volume("alpha", 1)
            .with_volume("beta", 2);
        let trends = MockTrendProvider::new()
            .with_score("alpha", 1.0)
            .with_score("beta", 2.0);
        let orchestrator = test_orchestrator(ads.clone(), trends.clone());
        orchestrator
            .cache()
            .put(&MetricResult::new(kw("alpha"), Some(99), Some(99.0)))
            .await;

        let results = orchestrator.process(&["alpha", "beta"]).await.unwrap();

        assert_eq!(results[0].ads_avg_monthly_searches, Some(99));
        assert_eq!(results[1].ads_avg_monthly_searches, Some(2));
        assert_eq!(ads.requested(), vec![vec![kw("beta")]]);
        assert_eq!(trends.calls(), 1);
    }

    #[tokio::test]
    async fn provider_failure_yields_partial_results() {
        let ads = MockBulkProvider::new().fail_next(vec![AppError::fatal(Provider::Ads, "quota")]);
        let trends = MockTrendProvider::new().with_score("alpha", 33.0);
        let orchestrator = test_orchestrator(ads, trends);

        let results = orchestrator.process(&["alpha"]).await.unwrap();

        assert_eq!(results[0].ads_avg_monthly_searches, None);
        assert_eq!(results[0].trends_score, Some(33.0));
        assert_eq!(
            orchestrator.ads().guard().breaker().state(),
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let ads = MockBulkProvider::new().fail_next(vec![AppError::fatal(Provider::Ads, "quota")]);
        let trends =
            MockTrendProvider::new().fail_next(vec![AppError::fatal(Provider::Trends, "captcha")]);
        let orchestrator = test_orchestrator(ads, trends);

        let results = orchestrator.process(&["alpha"]).await.unwrap();

        assert!(results[0].is_empty());
        assert!(!orchestrator.cache().contains(&kw("alpha")).await);
    }

    #[tokio::test]
    async fn global_deadline_returns_what_arrived() {
        let keywords: Vec<String> = (0..200).map(|i| format!("kw{i}")).collect();

        let ads = MockBulkProvider::new().with_delay(Duration::from_secs(10));
        let mut trends = MockTrendProvider::new();
        for (i, keyword) in keywords.iter().enumerate() {
            trends = trends.with_score(keyword, i as f64);
            if i >= 150 {
                trends = trends.with_keyword_delay(keyword, Duration::from_secs(10));
            }
        }
        let orchestrator = test_orchestrator(ads, trends);

        let started = Instant::now();
        let results = orchestrator
            .process_with(
                &keywords,
                Timeouts {
                    per_call: Duration::from_secs(30),
                    global: Duration::from_millis(300),
                },
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results.len(), 200);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.keyword.as_str(), format!("kw{i}"));
            assert_eq!(result.ads_avg_monthly_searches, None);
            if i < 150 {
                assert_eq!(result.trends_score, Some(i as f64));
            } else {
                assert_eq!(result.trends_score, None);
            }
        }
    }

    #[tokio::test]
    async fn fanout_bounds_concurrent_trend_calls() {
        let keywords: Vec<String> = (0..30).map(|i| format!("kw{i}")).collect();
        let mut trends = MockTrendProvider::new().with_delay(Duration::from_millis(20));
        for keyword in &keywords {
            trends = trends.with_score(keyword, 1.0);
        }
        let orchestrator = test_orchestrator(MockBulkProvider::new(), trends.clone());

        orchestrator.process(&keywords).await.unwrap();

        assert_eq!(trends.calls(), 30);
        assert!(trends.max_in_flight() <= 10);
        assert!(trends.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn works_with_unavailable_cache() {
        let orchestrator = test_orchestrator_with_store(
            MockBulkProvider::new().with_volume("alpha", 5),
            MockTrendProvider::new().with_score("alpha", 5.0),
            FailingStore,
        );

        let results = orchestrator.process(&["alpha"]).await.unwrap();
        assert!(results[0].is_complete());
    }

    #[test]
    fn estimate_scales_with_throttle() {
        let orchestrator = test_orchestrator(MockBulkProvider::new(), MockTrendProvider::new());
        // Unthrottled test clients: fan-out of 10.
        assert_eq!(orchestrator.estimate_seconds(200), 20);
        assert_eq!(orchestrator.estimate_seconds(1), 1);
    }
}
