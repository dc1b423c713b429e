use std::collections::HashMap;
use std::fmt;

use kwbatch_core::error::AppError;
use kwbatch_core::models::Provider;
use kwbatch_core::traits::{CredentialSupplier, Credentials};

/// Keys of the ads extras in [`Credentials::extra`].
pub const DEVELOPER_TOKEN: &str = "developer_token";
pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_SECRET: &str = "client_secret";

/// Reads provider credentials from environment variables.
///
/// Ads needs `ADS_REFRESH_TOKEN` (the credential secret, exchanged for access
/// tokens by the adapter) plus `ADS_CLIENT_ID`, `ADS_CLIENT_SECRET` and
/// `ADS_DEVELOPER_TOKEN`. Trends takes an optional `TRENDS_API_KEY`; without
/// it the secret is empty and no key header is sent.
#[derive(Clone, Default)]
pub struct EnvCredentialSupplier {
    vars: HashMap<String, String>,
}

const KEYS: [&str; 5] = [
    "ADS_REFRESH_TOKEN",
    "ADS_CLIENT_ID",
    "ADS_CLIENT_SECRET",
    "ADS_DEVELOPER_TOKEN",
    "TRENDS_API_KEY",
];

impl EnvCredentialSupplier {
    /// Snapshot the relevant variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let vars = KEYS
            .iter()
            .copied()
            .filter_map(|key| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v))
            })
            .collect();
        Self { vars }
    }

    fn require(&self, key: &str) -> Result<&str, AppError> {
        self.vars
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| AppError::Config(format!("{key} must be set")))
    }
}

impl fmt::Debug for EnvCredentialSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut present: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        present.sort_unstable();
        f.debug_struct("EnvCredentialSupplier")
            .field("present", &present)
            .finish()
    }
}

impl CredentialSupplier for EnvCredentialSupplier {
    fn credentials(&self, provider: Provider) -> Result<Credentials, AppError> {
        match provider {
            Provider::Ads => Ok(Credentials::new(self.require("ADS_REFRESH_TOKEN")?)
                .with_extra(CLIENT_ID, self.require("ADS_CLIENT_ID")?)
                .with_extra(CLIENT_SECRET, self.require("ADS_CLIENT_SECRET")?)
                .with_extra(DEVELOPER_TOKEN, self.require("ADS_DEVELOPER_TOKEN")?)),
            Provider::Trends => Ok(Credentials::new(
                self.vars.get("TRENDS_API_KEY").cloned().unwrap_or_default(),
            )),
        }
    }
}
