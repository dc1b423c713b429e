//! Bounded retry schedule with exponential backoff and jitter.
//!
//! [`RetrySchedule`] is a small state machine: each failed attempt is fed to
//! [`RetrySchedule::on_failure`], which either hands back the delay before the
//! next attempt or a terminal [`RetryStop`]. It never sleeps itself, so the
//! backoff arithmetic and the stop rules can be tested without a clock.

use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::util::rand_signed_unit;

/// Retry configuration with exponential backoff.
///
/// Delay schedule with the defaults: 1s, 2s (each ±20%), then give up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub base_delay: Duration,
    /// Fraction of the computed delay used as symmetric jitter (0.2 = ±20%).
    pub jitter: f64,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-indexed).
    ///
    /// `unit` in `[-1.0, 1.0]` selects where in the jitter band the delay lands.
    pub fn delay_for_attempt(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let base = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let factor = 1.0 + self.jitter.clamp(0.0, 1.0) * unit.clamp(-1.0, 1.0);
        base.mul_f64(factor.max(0.0))
    }

    /// Start a schedule for one logical call limited to `budget` overall.
    pub fn schedule(&self, budget: Duration) -> RetrySchedule {
        RetrySchedule {
            policy: self.clone(),
            attempts: 0,
            deadline: Instant::now() + budget,
        }
    }
}

/// Why a schedule stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// Provider signalled quota exhaustion or a challenge.
    Fatal,
    /// The error is not transient.
    NotRetryable,
    /// `max_attempts` reached.
    Exhausted,
    /// The next delay would not fit in the remaining call budget.
    BudgetSpent,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Retry { next_attempt: u32, delay: Duration },
    Stop(RetryStop),
}

/// Per-call retry state.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempts: u32,
    deadline: Instant,
}

impl RetrySchedule {
    /// Mark the start of an attempt and return its 1-indexed number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn on_failure(&mut self, error: &AppError) -> RetryStep {
        self.on_failure_with(error, rand_signed_unit())
    }

    /// Same as [`on_failure`](Self::on_failure) with an explicit jitter position.
    pub fn on_failure_with(&mut self, error: &AppError, unit: f64) -> RetryStep {
        if error.is_fatal() {
            return RetryStep::Stop(RetryStop::Fatal);
        }
        if !error.is_retryable() {
            return RetryStep::Stop(RetryStop::NotRetryable);
        }
        if self.attempts >= self.policy.max_attempts {
            return RetryStep::Stop(RetryStop::Exhausted);
        }

        let delay = self.policy.delay_for_attempt(self.attempts, unit);
        if delay >= self.remaining() {
            return RetryStep::Stop(RetryStop::BudgetSpent);
        }

        RetryStep::Retry {
            next_attempt: self.attempts + 1,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    fn transient() -> AppError {
        AppError::transient(Provider::Ads, "503")
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2, 0.0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3, 0.0), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(2, 1.0), Duration::from_millis(2400));
        assert_eq!(policy.delay_for_attempt(2, -1.0), Duration::from_millis(1600));

        for _ in 0..200 {
            let d = policy.delay_for_attempt(1, rand_signed_unit());
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(10, 0.0), Duration::from_secs(3));
    }

    #[test]
    fn retries_until_attempts_exhausted() {
        let mut schedule = RetryPolicy::default().schedule(Duration::from_secs(60));

        assert_eq!(schedule.begin_attempt(), 1);
        assert_eq!(
            schedule.on_failure_with(&transient(), 0.0),
            RetryStep::Retry {
                next_attempt: 2,
                delay: Duration::from_secs(1)
            }
        );

        assert_eq!(schedule.begin_attempt(), 2);
        assert_eq!(
            schedule.on_failure_with(&transient(), 0.0),
            RetryStep::Retry {
                next_attempt: 3,
                delay: Duration::from_secs(2)
            }
        );

        assert_eq!(schedule.begin_attempt(), 3);
        assert_eq!(
            schedule.on_failure_with(&transient(), 0.0),
            RetryStep::Stop(RetryStop::Exhausted)
        );
    }

    #[test]
    fn fatal_errors_stop_immediately() {
        let mut schedule = RetryPolicy::default().schedule(Duration::from_secs(60));
        schedule.begin_attempt();
        assert_eq!(
            schedule.on_failure_with(&AppError::fatal(Provider::Trends, "captcha"), 0.0),
            RetryStep::Stop(RetryStop::Fatal)
        );
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let mut schedule = RetryPolicy::default().schedule(Duration::from_secs(60));
        schedule.begin_attempt();
        assert_eq!(
            schedule.on_failure_with(&AppError::Validation("bad".into()), 0.0),
            RetryStep::Stop(RetryStop::NotRetryable)
        );
    }

    #[test]
    fn budget_caps_retries() {
        let mut schedule = RetryPolicy::default().schedule(Duration::from_millis(500));
        schedule.begin_attempt();
        assert_eq!(
            schedule.on_failure_with(&transient(), 0.0),
            RetryStep::Stop(RetryStop::BudgetSpent)
        );
    }
}
