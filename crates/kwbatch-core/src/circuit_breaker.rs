//! Per-provider circuit breaker.
//!
//! Stops hammering a provider that keeps failing, and lets a single trial
//! through once the cooldown has passed.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[cooldown]--> HALF_OPEN (one trial)
//!                                      ^                                   |
//!                                      +------------[trial fails]----------+
//!                                                                          |
//! CLOSED <-----------------------------[trial succeeds]--------------------+
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::models::Provider;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without reaching the provider.
    Open,
    /// Circuit is half-open - a single trial request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Per-provider breaker settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub cooldown: Duration,

    /// When true, a fatal provider signal (quota, challenge) opens the circuit
    /// immediately instead of counting as a single failure.
    pub trip_on_fatal: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
            trip_on_fatal: true,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    last_error_message: Option<String>,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            last_error_message: None,
        }
    }
}

/// Point-in-time breaker counters, for diagnostics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub provider: Provider,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker guarding one provider. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    provider: Provider,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(provider: Provider, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Lock the shared state, recovering from poisoning.
    fn lock_inner(&self) -> MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.provider, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Current state. An expired cooldown moves `Open` to `HalfOpen` here.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = if inner.state == CircuitState::Open {
            Some(self.remaining_cooldown(&inner))
        } else {
            None
        };

        CircuitBreakerStats {
            provider: self.provider,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Ask permission to call the provider.
    ///
    /// - Closed: always granted
    /// - Open: `AppError::CircuitOpen` until the cooldown has elapsed
    /// - HalfOpen: granted to exactly one caller; the rest are rejected until
    ///   that trial reports back
    pub fn try_acquire(&self) -> Result<CallPermit, AppError> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self.clone(), false)),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                tracing::info!(circuit = %self.provider, "Letting trial call through");
                Ok(CallPermit::new(self.clone(), true))
            }
            CircuitState::HalfOpen => Err(AppError::CircuitOpen {
                provider: self.provider,
                retry_after: Duration::ZERO,
            }),
            CircuitState::Open => Err(AppError::CircuitOpen {
                provider: self.provider,
                retry_after: self.remaining_cooldown(&inner),
            }),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.provider, "Trial succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                inner.last_error_message = None;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            // A call admitted before the circuit opened; its success says
            // nothing about the provider's health now.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        inner.last_error_message = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if self.config.trip_on_fatal && error.is_fatal() {
                    inner.consecutive_failures =
                        inner.consecutive_failures.max(self.config.failure_threshold);
                }

                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.provider,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.provider,
                    error = %error,
                    "Circuit breaker trial failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.provider, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::new();
    }

    /// Frees the half-open trial slot without recording an outcome.
    fn release_trial(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn remaining_cooldown(&self, inner: &CircuitBreakerInner) -> Duration {
        inner
            .opened_at
            .map(|t| self.config.cooldown.saturating_sub(t.elapsed()))
            .unwrap_or(self.config.cooldown)
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.cooldown
        {
            tracing::info!(
                circuit = %self.provider,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }
}

/// Permission to make one provider call, obtained from [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`success`](Self::success) or [`failure`](Self::failure).
/// A permit dropped without an outcome (cancelled call) frees the trial slot.
#[derive(Debug)]
pub struct CallPermit {
    breaker: CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Records the failure if it counts against the provider's health.
    pub fn failure(mut self, error: &AppError) {
        if error.should_trip_circuit() {
            self.settled = true;
            self.breaker.record_failure(error);
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}
