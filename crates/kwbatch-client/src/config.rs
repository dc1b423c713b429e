use std::time::Duration;

use kwbatch_core::error::AppError;
use url::Url;

use crate::http::{parse_base_url, parse_url};

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Settings for the ads keyword-planner bridge.
#[derive(Debug, Clone)]
pub struct AdsBridgeConfig {
    pub base_url: Url,
    /// OAuth endpoint where the refresh token is exchanged for access tokens.
    pub token_url: Url,
    /// Account id with dashes removed.
    pub customer_id: String,
    /// Language resource name, e.g. `languageConstants/1000`.
    pub language: String,
    /// Geo target resource name, e.g. `geoTargetConstants/2840`.
    pub geo: String,
    pub timeout: Duration,
}

/// Settings for the trends bridge.
#[derive(Debug, Clone)]
pub struct TrendsBridgeConfig {
    pub base_url: Url,
    pub geo: String,
    pub timeframe: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ads: AdsBridgeConfig,
    pub trends: TrendsBridgeConfig,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a custom variable source. Bridge URLs and the customer id
    /// are required.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| AppError::Config(format!("{key} must be set")))
        };

        let timeout_secs = match get("PROVIDER_HTTP_TIMEOUT_SECS") {
            None => 30,
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    AppError::Config(format!("Invalid PROVIDER_HTTP_TIMEOUT_SECS '{raw}'"))
                })?,
        };
        let timeout = Duration::from_secs(timeout_secs);

        let customer_id: String = require("ADS_CUSTOMER_ID")?
            .chars()
            .filter(|c| *c != '-')
            .collect();
        if !customer_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Config(format!(
                "ADS_CUSTOMER_ID must contain only digits and dashes, got '{customer_id}'"
            )));
        }

        let ads = AdsBridgeConfig {
            base_url: parse_base_url(&require("ADS_BRIDGE_URL")?)?,
            token_url: parse_url(
                get("ADS_TOKEN_URL")
                    .as_deref()
                    .unwrap_or(DEFAULT_TOKEN_URL),
            )?,
            customer_id,
            language: get("ADS_LANGUAGE").unwrap_or_else(|| "languageConstants/1000".into()),
            geo: get("ADS_GEO").unwrap_or_else(|| "geoTargetConstants/2840".into()),
            timeout,
        };

        let trends = TrendsBridgeConfig {
            base_url: parse_base_url(&require("TRENDS_BRIDGE_URL")?)?,
            geo: get("TRENDS_GEO").unwrap_or_else(|| "US".into()),
            timeframe: get("TRENDS_TIMEFRAME").unwrap_or_else(|| "today 12-m".into()),
            timeout,
        };

        Ok(Self { ads, trends })
    }
}
