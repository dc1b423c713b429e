use std::collections::HashMap;
use std::future::Future;

use crate::error::AppError;
use crate::models::{Keyword, Provider};

/// Fetches average monthly search volume for many keywords in one call.
///
/// Keywords absent from the returned map, or mapped to `None`, had no data.
pub trait BulkMetricsProvider: Send + Sync + Clone + 'static {
    fn fetch_bulk(
        &self,
        keywords: &[Keyword],
    ) -> impl Future<Output = Result<HashMap<Keyword, Option<i64>>, AppError>> + Send;
}

/// Fetches a 0-100 interest score for a single keyword.
///
/// Implementations report rate-limit or challenge pages as
/// [`AppError::ProviderFatal`] so the caller stops retrying.
pub trait TrendScoreProvider: Send + Sync + Clone + 'static {
    fn fetch_one(
        &self,
        keyword: &Keyword,
    ) -> impl Future<Output = Result<Option<f64>, AppError>> + Send;
}

/// Long-lived credentials for one provider, read once at startup.
///
/// `secret` is whatever the adapter authenticates with: the OAuth refresh
/// token for ads (exchanged for access tokens by the adapter), the API key
/// for trends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub secret: String,
    /// Provider-specific extras such as a developer token or OAuth client id.
    pub extra: HashMap<String, String>,
}

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Supplies credentials at startup. Failing here is fatal for the process.
pub trait CredentialSupplier: Send + Sync {
    fn credentials(&self, provider: Provider) -> Result<Credentials, AppError>;
}
