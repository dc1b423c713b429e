//! Per-provider call throttling.
//!
//! Enforces a minimum interval between consecutive outbound calls to the same
//! provider. Each caller reserves the next free slot under a short lock and then
//! sleeps until that slot outside the lock, so the rate ceiling holds no matter
//! how many tasks call [`RateLimiter::acquire`] concurrently. Waiters are not
//! served in any particular order.
//!
//! Two optional extras per provider:
//!
//! - a [`Quota`] caps the calls started within a fixed window (fifty per hour
//!   for the trend provider); once spent, `acquire` fails with
//!   [`AppError::QuotaExhausted`] until the window rolls over
//! - a [`Backoff`] widens the interval after failures and narrows it back
//!   towards the configured interval after a run of successes
//!
//! A wait that is dropped before its slot arrives (the caller timed out) hands
//! the slot back, provided nobody has queued behind it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use kwbatch_core::models::Provider;
//! use kwbatch_core::throttle::{RateLimiter, ThrottleConfig};
//!
//! # async fn run() -> Result<(), kwbatch_core::error::AppError> {
//! let limiter = RateLimiter::new()
//!     .with_provider(Provider::Trends, ThrottleConfig::new(Duration::from_secs(1)));
//! limiter.acquire(Provider::Trends).await?;
//! # Ok::<(), kwbatch_core::error::AppError>(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::models::Provider;
use crate::util::rand_below;

const HOUR: Duration = Duration::from_secs(3600);

/// Cap on calls started within a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

impl Quota {
    pub fn per_hour(limit: u32) -> Self {
        Self {
            limit,
            window: HOUR,
        }
    }
}

/// Adaptive interval: multiplied up on failure, decayed on sustained success.
///
/// The interval never drops below the configured base.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Applied after a fatal error (quota exhausted, challenge page).
    pub fatal_factor: f64,
    pub fatal_ceiling: Duration,
    /// Applied after any other provider error.
    pub error_factor: f64,
    pub error_ceiling: Duration,
    pub recovery_factor: f64,
    /// Successes in a row before recovery starts.
    pub recover_after: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            fatal_factor: 2.0,
            fatal_ceiling: Duration::from_secs(30),
            error_factor: 1.2,
            error_ceiling: Duration::from_secs(20),
            recovery_factor: 0.95,
            recover_after: 5,
        }
    }
}

impl Backoff {
    fn widen(&self, current: Duration, fatal: bool) -> Duration {
        let (factor, ceiling) = if fatal {
            (self.fatal_factor, self.fatal_ceiling)
        } else {
            (self.error_factor, self.error_ceiling)
        };
        current.mul_f64(factor).min(ceiling).max(current)
    }

    fn recover(&self, current: Duration, base: Duration) -> Duration {
        current.mul_f64(self.recovery_factor).max(base)
    }
}

/// Throttle settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// Minimum time between the starts of two consecutive calls.
    pub interval: Duration,

    /// Maximum random jitter added on top of `interval` (uniform [0, jitter]).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,

    pub quota: Option<Quota>,

    pub backoff: Option<Backoff>,
}

impl ThrottleConfig {
    /// Create a config with the given interval and no jitter.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            quota: None,
            backoff: None,
        }
    }

    /// No throttling at all.
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Add random jitter (uniform [0, jitter]) on top of the base interval.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_quota(mut self, quota: Quota) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    fn is_unthrottled(&self) -> bool {
        self.interval.is_zero() && self.jitter.is_zero() && self.quota.is_none()
    }

    /// Spacing for a single reservation: the lane's current interval plus jitter.
    fn spacing(&self, interval: Duration) -> Duration {
        if self.jitter.is_zero() {
            return interval;
        }
        interval + Duration::from_millis(rand_below(self.jitter.as_millis() as u64))
    }
}

impl Default for ThrottleConfig {
    /// One call per second, the pace the trend-score provider tolerates.
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Mutable throttle state for one provider.
#[derive(Debug)]
struct Lane {
    /// Earliest instant at which the next call may start.
    next_slot: Option<Instant>,
    interval: Duration,
    successes: u32,
    window_start: Instant,
    window_calls: u32,
}

impl Lane {
    fn new(interval: Duration) -> Self {
        Self {
            next_slot: None,
            interval,
            successes: 0,
            window_start: Instant::now(),
            window_calls: 0,
        }
    }
}

/// Shared per-provider rate limiter. Cloning shares the same lanes.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    configs: HashMap<Provider, ThrottleConfig>,
    lanes: Arc<Mutex<HashMap<Provider, Lane>>>,
}

impl RateLimiter {
    /// A limiter with every provider unthrottled until configured.
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configure the throttle for one provider.
    pub fn with_provider(mut self, provider: Provider, config: ThrottleConfig) -> Self {
        self.configs.insert(provider, config);
        self
    }

    pub fn config(&self, provider: Provider) -> Option<&ThrottleConfig> {
        self.configs.get(&provider)
    }

    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<Provider, Lane>> {
        self.lanes.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Wait until a call to `provider` is permitted.
    ///
    /// Fails with [`AppError::QuotaExhausted`] when the provider's window quota
    /// is spent; nothing is reserved in that case.
    pub async fn acquire(&self, provider: Provider) -> Result<(), AppError> {
        let Some(config) = self.configs.get(&provider) else {
            return Ok(());
        };
        if config.is_unthrottled() {
            return Ok(());
        }

        let reservation = self.reserve(provider, config)?;

        if !reservation.wait.is_zero() {
            tracing::debug!(
                provider = %provider,
                sleep_ms = %reservation.wait.as_millis(),
                "Throttling provider call"
            );
            tokio::time::sleep(reservation.wait).await;
        }
        reservation.commit();
        Ok(())
    }

    fn reserve(
        &self,
        provider: Provider,
        config: &ThrottleConfig,
    ) -> Result<Reservation<'_>, AppError> {
        let mut lanes = self.lock_lanes();
        let lane = lanes
            .entry(provider)
            .or_insert_with(|| Lane::new(config.interval));
        let now = Instant::now();

        if let Some(quota) = config.quota {
            if now.duration_since(lane.window_start) >= quota.window {
                lane.window_start = now;
                lane.window_calls = 0;
            }
            if lane.window_calls >= quota.limit {
                let retry_after =
                    quota.window.saturating_sub(now.duration_since(lane.window_start));
                tracing::warn!(
                    provider = %provider,
                    limit = quota.limit,
                    retry_after_secs = retry_after.as_secs(),
                    "Provider quota spent for this window"
                );
                return Err(AppError::QuotaExhausted {
                    provider,
                    retry_after,
                });
            }
            lane.window_calls += 1;
        }

        let slot = lane.next_slot.filter(|next| *next > now).unwrap_or(now);
        let previous = lane.next_slot;
        let reserved = slot + config.spacing(lane.interval);
        lane.next_slot = Some(reserved);

        Ok(Reservation {
            limiter: self,
            provider,
            previous,
            reserved,
            window_start: config.quota.map(|_| lane.window_start),
            wait: slot - now,
            committed: false,
        })
    }

    /// Feed a successful call into the provider's adaptive interval.
    pub fn record_success(&self, provider: Provider) {
        let Some(config) = self.configs.get(&provider) else {
            return;
        };
        let Some(backoff) = &config.backoff else {
            return;
        };
        let mut lanes = self.lock_lanes();
        let lane = lanes
            .entry(provider)
            .or_insert_with(|| Lane::new(config.interval));
        lane.successes = lane.successes.saturating_add(1);
        if lane.successes > backoff.recover_after && lane.interval > config.interval {
            lane.interval = backoff.recover(lane.interval, config.interval);
            tracing::debug!(
                provider = %provider,
                interval_ms = lane.interval.as_millis() as u64,
                "Throttle interval relaxed"
            );
        }
    }

    /// Feed a failed call into the provider's adaptive interval.
    ///
    /// Only provider-side failures count; a spent quota or an open circuit
    /// leaves the interval alone.
    pub fn record_failure(&self, provider: Provider, error: &AppError) {
        if !error.should_trip_circuit() {
            return;
        }
        let Some(config) = self.configs.get(&provider) else {
            return;
        };
        let Some(backoff) = &config.backoff else {
            return;
        };
        let mut lanes = self.lock_lanes();
        let lane = lanes
            .entry(provider)
            .or_insert_with(|| Lane::new(config.interval));
        lane.successes = 0;
        let widened = backoff.widen(lane.interval, error.is_fatal());
        if widened != lane.interval {
            lane.interval = widened;
            tracing::info!(
                provider = %provider,
                interval_ms = widened.as_millis() as u64,
                fatal = error.is_fatal(),
                "Throttle interval widened"
            );
        }
    }

    #[cfg(test)]
    fn current_interval(&self, provider: Provider) -> Option<Duration> {
        self.lock_lanes().get(&provider).map(|lane| lane.interval)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// A reserved slot. Dropped before [`commit`](Self::commit), it hands the slot
/// and its quota unit back.
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    provider: Provider,
    previous: Option<Instant>,
    reserved: Instant,
    /// Start of the quota window the call was counted in, if any.
    window_start: Option<Instant>,
    wait: Duration,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut lanes = self.limiter.lock_lanes();
        let Some(lane) = lanes.get_mut(&self.provider) else {
            return;
        };
        // A later caller already queued behind this slot keeps its place.
        if lane.next_slot == Some(self.reserved) {
            lane.next_slot = self.previous;
        }
        if self.window_start == Some(lane.window_start) {
            lane.window_calls = lane.window_calls.saturating_sub(1);
        }
        tracing::debug!(provider = %self.provider, "Abandoned throttle slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Option<Duration>, expected: Duration) {
        let actual = actual.expect("lane should exist");
        let diff = actual.abs_diff(expected);
        assert!(
            diff < Duration::from_millis(1),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn spacing_without_jitter() {
        let config = ThrottleConfig::new(Duration::from_secs(1));
        assert_eq!(config.spacing(config.interval), Duration::from_secs(1));
    }

    #[test]
    fn spacing_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.spacing(config.interval);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn first_call_is_not_delayed() {
        let limiter = RateLimiter::new()
            .with_provider(Provider::Trends, ThrottleConfig::new(Duration::from_secs(5)));

        let start = Instant::now();
        limiter.acquire(Provider::Trends).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn enforces_interval_for_same_provider() {
        let limiter = RateLimiter::new()
            .with_provider(Provider::Trends, ThrottleConfig::new(Duration::from_millis(100)));

        let start = Instant::now();
        limiter.acquire(Provider::Trends).await.unwrap();
        limiter.acquire(Provider::Trends).await.unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(100),
            "Second call should have been delayed by at least 100ms, elapsed: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn concurrent_callers_respect_the_ceiling() {
        let limiter = RateLimiter::new()
            .with_provider(Provider::Trends, ThrottleConfig::new(Duration::from_millis(50)));

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(Provider::Trends).await.unwrap();
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        // Five calls need at least four full intervals.
        assert!(start.elapsed() >= Duration::from_millis(200));
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(45));
        }
    }

    #[tokio::test]
    async fn providers_are_throttled_independently() {
        let limiter = RateLimiter::new()
            .with_provider(Provider::Trends, ThrottleConfig::new(Duration::from_millis(200)));

        let start = Instant::now();
        limiter.acquire(Provider::Trends).await.unwrap();
        limiter.acquire(Provider::Ads).await.unwrap();
        limiter.acquire(Provider::Ads).await.unwrap();

        assert!(
            start.elapsed() < Duration::from_millis(150),
            "Unconfigured provider must not wait on another provider's slot"
        );
    }

    #[tokio::test]
    async fn quota_rejects_calls_past_the_limit() {
        let limiter = RateLimiter::new().with_provider(
            Provider::Trends,
            ThrottleConfig::unthrottled().with_quota(Quota::per_hour(2)),
        );

        limiter.acquire(Provider::Trends).await.unwrap();
        limiter.acquire(Provider::Trends).await.unwrap();
        match limiter.acquire(Provider::Trends).await {
            Err(AppError::QuotaExhausted {
                provider,
                retry_after,
            }) => {
                assert_eq!(provider, Provider::Trends);
                assert!(retry_after > Duration::from_secs(3590));
            }
            other => panic!("expected QuotaExhausted, got {other:?}"),
        }
        limiter.acquire(Provider::Ads).await.unwrap();
    }

    #[tokio::test]
    async fn quota_window_rolls_over() {
        let limiter = RateLimiter::new().with_provider(
            Provider::Trends,
            ThrottleConfig::unthrottled().with_quota(Quota {
                limit: 1,
                window: Duration::from_millis(50),
            }),
        );

        limiter.acquire(Provider::Trends).await.unwrap();
        assert!(limiter.acquire(Provider::Trends).await.is_err());
        tokio::time::sleep(Duration::from_millis(70)).await;
        limiter.acquire(Provider::Trends).await.unwrap();
    }

    #[test]
    fn backoff_default_factors() {
        let backoff = Backoff::default();
        assert_eq!(
            backoff.widen(Duration::from_secs(5), true),
            Duration::from_secs(10)
        );
        assert_eq!(
            backoff.widen(Duration::from_secs(20), true),
            Duration::from_secs(30)
        );
        assert_close(
            Some(backoff.widen(Duration::from_secs(5), false)),
            Duration::from_secs(6),
        );
        // Above the error ceiling an ordinary error never narrows the interval.
        assert_eq!(
            backoff.widen(Duration::from_secs(25), false),
            Duration::from_secs(25)
        );
        assert_eq!(
            backoff.recover(Duration::from_millis(1010), Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn failures_widen_the_interval() {
        let limiter = RateLimiter::new().with_provider(
            Provider::Trends,
            ThrottleConfig::new(Duration::from_secs(1)).with_backoff(Backoff::default()),
        );

        limiter.record_failure(Provider::Trends, &AppError::fatal(Provider::Trends, "429"));
        assert_eq!(
            limiter.current_interval(Provider::Trends),
            Some(Duration::from_secs(2))
        );

        limiter.record_failure(Provider::Trends, &AppError::transient(Provider::Trends, "503"));
        assert_close(
            limiter.current_interval(Provider::Trends),
            Duration::from_millis(2400),
        );

        // Quota and circuit rejections say nothing about the provider.
        limiter.record_failure(
            Provider::Trends,
            &AppError::QuotaExhausted {
                provider: Provider::Trends,
                retry_after: Duration::from_secs(1),
            },
        );
        assert_close(
            limiter.current_interval(Provider::Trends),
            Duration::from_millis(2400),
        );
    }

    #[tokio::test]
    async fn sustained_success_relaxes_back_to_base() {
        let limiter = RateLimiter::new().with_provider(
            Provider::Trends,
            ThrottleConfig::new(Duration::from_secs(1)).with_backoff(Backoff::default()),
        );
        limiter.record_failure(Provider::Trends, &AppError::fatal(Provider::Trends, "429"));

        for _ in 0..5 {
            limiter.record_success(Provider::Trends);
        }
        assert_eq!(
            limiter.current_interval(Provider::Trends),
            Some(Duration::from_secs(2))
        );

        limiter.record_success(Provider::Trends);
        assert_close(
            limiter.current_interval(Provider::Trends),
            Duration::from_millis(1900),
        );

        for _ in 0..100 {
            limiter.record_success(Provider::Trends);
        }
        assert_eq!(
            limiter.current_interval(Provider::Trends),
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn widened_interval_spaces_later_calls() {
        let limiter = RateLimiter::new().with_provider(
            Provider::Trends,
            ThrottleConfig::new(Duration::from_millis(50)).with_backoff(Backoff::default()),
        );
        limiter.record_failure(Provider::Trends, &AppError::fatal(Provider::Trends, "429"));
        limiter.record_failure(Provider::Trends, &AppError::fatal(Provider::Trends, "429"));

        let start = Instant::now();
        limiter.acquire(Provider::Trends).await.unwrap();
        limiter.acquire(Provider::Trends).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn cancelled_wait_releases_its_slot() {
        let limiter = RateLimiter::new()
            .with_provider(Provider::Trends, ThrottleConfig::new(Duration::from_millis(300)));
        limiter.acquire(Provider::Trends).await.unwrap();

        // Times out while waiting for the second slot.
        let waited =
            tokio::time::timeout(Duration::from_millis(50), limiter.acquire(Provider::Trends))
                .await;
        assert!(waited.is_err());

        // Only the first reservation remains, so this waits about 250ms, not 550ms.
        let start = Instant::now();
        limiter.acquire(Provider::Trends).await.unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_millis(400),
            "Abandoned slot was not released, waited {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn cancelled_wait_returns_its_quota_unit() {
        let limiter = RateLimiter::new().with_provider(
            Provider::Trends,
            ThrottleConfig::new(Duration::from_millis(200)).with_quota(Quota::per_hour(2)),
        );
        limiter.acquire(Provider::Trends).await.unwrap();

        let waited =
            tokio::time::timeout(Duration::from_millis(20), limiter.acquire(Provider::Trends))
                .await;
        assert!(waited.is_err());

        limiter.acquire(Provider::Trends).await.unwrap();
    }

    #[test]
    fn default_config_is_one_per_second() {
        let config = ThrottleConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.jitter, Duration::ZERO);
    }
}
