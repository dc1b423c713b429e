use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::Provider;

/// Application-wide error types for the keyword metrics engine.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad or oversized input, rejected before any external call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Retryable provider failure (network, 5xx, timeouts).
    #[error("{provider} provider error: {message}")]
    ProviderTransient { provider: Provider, message: String },

    /// Quota exhausted or challenge detected. Never retried.
    #[error("{provider} provider fatal error: {message}")]
    ProviderFatal { provider: Provider, message: String },

    /// Circuit is open; the call was rejected without contacting the provider.
    #[error("Circuit breaker '{provider}' is open. Retry after {} seconds.", .retry_after.as_secs())]
    CircuitOpen {
        provider: Provider,
        retry_after: Duration,
    },

    /// The local per-window call quota for a provider is spent.
    #[error("{provider} request quota reached. Retry after {} seconds.", .retry_after.as_secs())]
    QuotaExhausted {
        provider: Provider,
        retry_after: Duration,
    },

    /// Cache backend failed. Callers treat this as a miss.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A time budget ran out before the work finished.
    #[error("Deadline exceeded after {} ms", .0.as_millis())]
    DeadlineExceeded(Duration),

    /// Another job is still being processed.
    #[error("Job {active} is still processing")]
    JobConflict { active: Uuid },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client could not be built or a response could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn transient(provider: Provider, message: impl Into<String>) -> Self {
        AppError::ProviderTransient {
            provider,
            message: message.into(),
        }
    }

    pub fn fatal(provider: Provider, message: impl Into<String>) -> Self {
        AppError::ProviderFatal {
            provider,
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ProviderTransient { .. })
    }

    /// Returns true if the provider signalled quota exhaustion or a challenge.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::ProviderFatal { .. })
    }

    /// Returns true if this error should count against the provider's circuit.
    pub fn should_trip_circuit(&self) -> bool {
        matches!(
            self,
            AppError::ProviderTransient { .. }
                | AppError::ProviderFatal { .. }
                | AppError::DeadlineExceeded(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::transient(Provider::Trends, "reset").is_retryable());
        assert!(!AppError::fatal(Provider::Trends, "captcha").is_retryable());
        assert!(!AppError::Validation("empty".into()).is_retryable());
        assert!(
            !AppError::CircuitOpen {
                provider: Provider::Ads,
                retry_after: Duration::from_secs(10),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::transient(Provider::Ads, "503").should_trip_circuit());
        assert!(AppError::fatal(Provider::Ads, "quota").should_trip_circuit());
        assert!(AppError::DeadlineExceeded(Duration::from_secs(30)).should_trip_circuit());
        assert!(!AppError::Validation("bad".into()).should_trip_circuit());
        assert!(!AppError::CacheUnavailable("down".into()).should_trip_circuit());
        assert!(
            !AppError::QuotaExhausted {
                provider: Provider::Trends,
                retry_after: Duration::from_secs(60),
            }
            .should_trip_circuit()
        );
    }

    #[test]
    fn test_circuit_open_message() {
        let err = AppError::CircuitOpen {
            provider: Provider::Trends,
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'trends' is open. Retry after 42 seconds."
        );
    }
}
