use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::client::CallGuard;
use crate::error::AppError;
use crate::job_manager::JobConfig;
use crate::models::Provider;
use crate::retry::RetryPolicy;
use crate::throttle::{Backoff, Quota, RateLimiter, ThrottleConfig};

/// Which cache backend serves reads first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process store, with the JSON file as fallback.
    Memory,
    /// JSON file only.
    File,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackend::Memory => "memory",
            CacheBackend::File => "file",
        }
    }
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "file" => Ok(CacheBackend::File),
            _ => Err(format!("Unknown cache backend: {s}")),
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub file_path: PathBuf,
    /// Entry ceiling for the fallback file.
    pub max_file_entries: usize,
    /// Entry ceiling for the in-process store.
    pub primary_capacity: u64,
    pub backend: CacheBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86_400),
            file_path: PathBuf::from("cache.json"),
            max_file_entries: 3000,
            primary_capacity: 10_000,
            backend: CacheBackend::Memory,
        }
    }
}

/// Everything the engine needs, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub ads_throttle: ThrottleConfig,
    pub trends_throttle: ThrottleConfig,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub jobs: JobConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            ads_throttle: ThrottleConfig::unthrottled(),
            trends_throttle: ThrottleConfig::default()
                .with_quota(Quota::per_hour(50))
                .with_backoff(Backoff::default()),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// Every variable is optional; see `.env.example` for names and defaults.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let cache = CacheConfig {
            ttl: Duration::from_secs(vars.positive("CACHE_TTL", defaults.cache.ttl.as_secs())?),
            file_path: vars
                .raw("CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache.file_path),
            max_file_entries: vars.positive("CACHE_MAX_ENTRIES", defaults.cache.max_file_entries)?,
            primary_capacity: vars
                .positive("CACHE_PRIMARY_CAPACITY", defaults.cache.primary_capacity)?,
            backend: vars.parse("CACHE_BACKEND", defaults.cache.backend)?,
        };

        let batch = BatchConfig {
            max_keywords: vars.positive("BATCH_MAX_KEYWORDS", defaults.batch.max_keywords)?,
            fanout: vars.positive("BATCH_FANOUT", defaults.batch.fanout)?,
            per_call_timeout: Duration::from_secs(vars.positive(
                "BATCH_PER_CALL_TIMEOUT_SECS",
                defaults.batch.per_call_timeout.as_secs(),
            )?),
            global_timeout: Duration::from_secs(vars.positive(
                "BATCH_GLOBAL_TIMEOUT_SECS",
                defaults.batch.global_timeout.as_secs(),
            )?),
        };

        let ads_throttle = throttle(&vars, "ADS", &defaults.ads_throttle)?;
        let trends_throttle = throttle(&vars, "TRENDS", &defaults.trends_throttle)?;

        let jitter: f64 = vars.parse("RETRY_JITTER", defaults.retry.jitter)?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(AppError::Config(format!(
                "Invalid RETRY_JITTER '{jitter}': must be between 0 and 1"
            )));
        }
        let retry = RetryPolicy {
            max_attempts: vars.positive("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_millis(vars.positive(
                "RETRY_BASE_DELAY_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )?),
            jitter,
            ..defaults.retry
        };

        let breaker = CircuitBreakerConfig {
            failure_threshold: vars
                .positive("CIRCUIT_FAILURE_THRESHOLD", defaults.breaker.failure_threshold)?,
            cooldown: Duration::from_secs(vars.positive(
                "CIRCUIT_COOLDOWN_SECS",
                defaults.breaker.cooldown.as_secs(),
            )?),
            ..defaults.breaker
        };

        let jobs = JobConfig {
            chunk_size: vars.positive("JOB_CHUNK_SIZE", defaults.jobs.chunk_size)?,
            workers: vars.positive("JOB_WORKERS", defaults.jobs.workers)?,
            max_keywords: vars.positive("JOB_MAX_KEYWORDS", batch.max_keywords)?,
            chunk_delay: Duration::from_millis(vars.parse(
                "JOB_CHUNK_DELAY_MS",
                defaults.jobs.chunk_delay.as_millis() as u64,
            )?),
        };

        Ok(Self {
            cache,
            batch,
            ads_throttle,
            trends_throttle,
            retry,
            breaker,
            jobs,
        })
    }

    /// One limiter shared by every client built from this config.
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new()
            .with_provider(Provider::Ads, self.ads_throttle.clone())
            .with_provider(Provider::Trends, self.trends_throttle.clone())
    }

    /// Call discipline for `provider` with a fresh circuit breaker.
    pub fn call_guard(&self, provider: Provider, limiter: &RateLimiter) -> CallGuard {
        CallGuard::new(
            CircuitBreaker::new(provider, self.breaker.clone()),
            limiter.clone(),
            self.retry.clone(),
        )
    }
}

/// `<PREFIX>_MIN_INTERVAL_MS`, `<PREFIX>_HOURLY_LIMIT` (0 disables the cap)
/// and `<PREFIX>_ADAPTIVE_THROTTLE` for one provider.
fn throttle<L>(
    vars: &Vars<'_, L>,
    prefix: &str,
    defaults: &ThrottleConfig,
) -> Result<ThrottleConfig, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    let mut config = ThrottleConfig::new(Duration::from_millis(vars.parse(
        &format!("{prefix}_MIN_INTERVAL_MS"),
        defaults.interval.as_millis() as u64,
    )?));

    let hourly: u32 = vars.parse(
        &format!("{prefix}_HOURLY_LIMIT"),
        defaults.quota.map_or(0, |q| q.limit),
    )?;
    if hourly > 0 {
        config = config.with_quota(Quota::per_hour(hourly));
    }

    if vars.parse(
        &format!("{prefix}_ADAPTIVE_THROTTLE"),
        defaults.backoff.is_some(),
    )? {
        config = config.with_backoff(defaults.backoff.clone().unwrap_or_default());
    }
    Ok(config)
}

struct Vars<'a, L>(&'a L);

impl<L> Vars<'_, L>
where
    L: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid {key} '{raw}'"))),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let value = self.parse(key, default)?;
        if value <= T::default() {
            return Err(AppError::Config(format!("{key} must be at least 1")));
        }
        Ok(value)
    }
}
