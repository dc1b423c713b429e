//! Provider clients: circuit breaker gate, throttle, bounded retries and a
//! per-call time budget wrapped around a raw provider.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::AppError;
use crate::models::{Keyword, Provider};
use crate::retry::{RetryPolicy, RetryStep};
use crate::throttle::RateLimiter;
use crate::traits::{BulkMetricsProvider, TrendScoreProvider};

/// Call discipline shared by both provider clients.
///
/// One logical call takes one breaker permit. Every attempt inside it waits on
/// the rate limiter first and reports its outcome back to it, so the limiter can
/// widen the interval after failures. The circuit only learns the final outcome,
/// so three failed attempts count as one failure.
#[derive(Debug, Clone)]
pub struct CallGuard {
    provider: Provider,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl CallGuard {
    pub fn new(breaker: CircuitBreaker, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self {
            provider: breaker.provider(),
            breaker,
            limiter,
            policy,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run `op` with retries until it succeeds, fails terminally, or `budget` runs out.
    ///
    /// Fails fast with [`AppError::CircuitOpen`] when the circuit rejects the call.
    pub async fn run<T, F, Fut>(&self, budget: Duration, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let permit = self.breaker.try_acquire()?;

        let result = match tokio::time::timeout(budget, self.attempt_loop(budget, &mut op)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::DeadlineExceeded(budget)),
        };

        match &result {
            Ok(_) => permit.success(),
            Err(e) => permit.failure(e),
        }
        result
    }

    async fn attempt_loop<T, F, Fut>(&self, budget: Duration, op: &mut F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut schedule = self.policy.schedule(budget);
        loop {
            self.limiter.acquire(self.provider).await?;
            let attempt = schedule.begin_attempt();

            let error = match op().await {
                Ok(value) => {
                    self.limiter.record_success(self.provider);
                    return Ok(value);
                }
                Err(e) => {
                    self.limiter.record_failure(self.provider, &e);
                    e
                }
            };

            match schedule.on_failure(&error) {
                RetryStep::Retry {
                    next_attempt,
                    delay,
                } => {
                    tracing::warn!(
                        provider = %self.provider,
                        attempt,
                        next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryStep::Stop(reason) => {
                    tracing::debug!(
                        provider = %self.provider,
                        attempt,
                        ?reason,
                        "Giving up on provider call"
                    );
                    return Err(error);
                }
            }
        }
    }
}

/// Bulk search-volume client.
#[derive(Debug, Clone)]
pub struct AdsClient<B: BulkMetricsProvider> {
    provider: B,
    guard: CallGuard,
}

impl<B: BulkMetricsProvider> AdsClient<B> {
    pub fn new(provider: B, guard: CallGuard) -> Self {
        Self { provider, guard }
    }

    pub fn guard(&self) -> &CallGuard {
        &self.guard
    }

    /// Fetch volumes for all `keywords` in one logical call.
    pub async fn fetch(
        &self,
        keywords: &[Keyword],
        budget: Duration,
    ) -> Result<HashMap<Keyword, Option<i64>>, AppError> {
        let started = Instant::now();
        let result = self
            .guard
            .run(budget, || self.provider.fetch_bulk(keywords))
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(volumes) => tracing::info!(
                target: "kwbatch::ads",
                keywords = keywords.len(),
                returned = volumes.values().filter(|v| v.is_some()).count(),
                duration_ms,
                "Ads bulk fetch completed"
            ),
            Err(e) => tracing::warn!(
                target: "kwbatch::ads",
                keywords = keywords.len(),
                duration_ms,
                error = %e,
                "Ads bulk fetch failed"
            ),
        }
        result
    }
}

/// Per-keyword trend score client.
#[derive(Debug, Clone)]
pub struct TrendsClient<T: TrendScoreProvider> {
    provider: T,
    guard: CallGuard,
}

impl<T: TrendScoreProvider> TrendsClient<T> {
    pub fn new(provider: T, guard: CallGuard) -> Self {
        Self { provider, guard }
    }

    pub fn guard(&self) -> &CallGuard {
        &self.guard
    }

    pub async fn fetch(&self, keyword: &Keyword, budget: Duration) -> Result<Option<f64>, AppError> {
        let started = Instant::now();
        let result = self
            .guard
            .run(budget, || self.provider.fetch_one(keyword))
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(score) => tracing::debug!(
                target: "kwbatch::trends",
                %keyword,
                ?score,
                duration_ms,
                "Trend score fetched"
            ),
            // An open circuit or spent quota fails every remaining keyword; keep that quiet.
            Err(e @ (AppError::CircuitOpen { .. } | AppError::QuotaExhausted { .. })) => tracing::debug!(
                target: "kwbatch::trends",
                %keyword,
                error = %e,
                "Trend score skipped"
            ),
            Err(e) => tracing::warn!(
                target: "kwbatch::trends",
                %keyword,
                duration_ms,
                error = %e,
                "Trend score fetch failed"
            ),
        }
        result
    }
}
