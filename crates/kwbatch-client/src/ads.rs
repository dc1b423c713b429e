use std::collections::HashMap;

use kwbatch_core::error::AppError;
use kwbatch_core::models::{Keyword, Provider};
use kwbatch_core::traits::{BulkMetricsProvider, Credentials};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AdsBridgeConfig;
use crate::credentials::{CLIENT_ID, CLIENT_SECRET, DEVELOPER_TOKEN};
use crate::http::{build_client, endpoint, status_error, transport_error};
use crate::oauth::{AccessTokenSource, OAuthClient};

/// Historical keyword metrics over the ads REST bridge.
///
/// One POST per batch, authenticated with an access token obtained from the
/// refresh token. Results come back in request order and are matched to
/// keywords by position.
#[derive(Clone)]
pub struct HttpBulkMetricsProvider {
    client: Client,
    url: Url,
    language: String,
    geo: String,
    tokens: AccessTokenSource,
    developer_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalMetricsRequest<'a> {
    keywords: Vec<&'a str>,
    language: &'a str,
    geo_target_constants: [&'a str; 1],
    keyword_plan_network: &'static str,
}

#[derive(Debug, Deserialize)]
struct HistoricalMetricsResponse {
    #[serde(default)]
    results: Vec<HistoricalMetricsResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalMetricsResult {
    #[serde(default)]
    keyword_metrics: Option<KeywordMetrics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordMetrics {
    /// int64 values arrive as JSON strings on the REST surface.
    #[serde(default)]
    avg_monthly_searches: Option<Int64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Int64 {
    Number(i64),
    Text(String),
}

impl Int64 {
    fn value(&self) -> Option<i64> {
        match self {
            Int64::Number(n) => Some(*n),
            Int64::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl HttpBulkMetricsProvider {
    pub fn new(config: &AdsBridgeConfig, credentials: Credentials) -> Result<Self, AppError> {
        let extra = |key: &str| {
            credentials
                .extra
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| AppError::Config(format!("Ads credentials lack {key}")))
        };
        if credentials.secret.is_empty() {
            return Err(AppError::Config("Ads refresh token is empty".into()));
        }
        let oauth = OAuthClient {
            client_id: extra(CLIENT_ID)?,
            client_secret: extra(CLIENT_SECRET)?,
            refresh_token: credentials.secret.clone(),
        };
        let developer_token = extra(DEVELOPER_TOKEN)?;

        let url = endpoint(
            &config.base_url,
            &format!(
                "customers/{}:generateKeywordHistoricalMetrics",
                config.customer_id
            ),
        )?;
        let client = build_client(config.timeout)?;
        Ok(Self {
            tokens: AccessTokenSource::new(client.clone(), config.token_url.clone(), oauth),
            client,
            url,
            language: config.language.clone(),
            geo: config.geo.clone(),
            developer_token,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl BulkMetricsProvider for HttpBulkMetricsProvider {
    async fn fetch_bulk(
        &self,
        keywords: &[Keyword],
    ) -> Result<HashMap<Keyword, Option<i64>>, AppError> {
        if keywords.is_empty() {
            return Ok(HashMap::new());
        }

        let body = HistoricalMetricsRequest {
            keywords: keywords.iter().map(Keyword::as_str).collect(),
            language: &self.language,
            geo_target_constants: [&self.geo],
            keyword_plan_network: "GOOGLE_SEARCH",
        };

        let access_token = self.tokens.access_token().await?;
        let request = self
            .client
            .post(self.url.clone())
            .bearer_auth(access_token)
            .header("developer-token", &self.developer_token)
            .json(&body);

        tracing::debug!(
            target: "kwbatch::ads",
            keywords = keywords.len(),
            "Requesting historical metrics"
        );

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(Provider::Ads, e))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // Revoked or expired early; the retry exchanges a fresh one.
            self.tokens.invalidate().await;
            return Err(AppError::transient(
                Provider::Ads,
                "Access token rejected (HTTP 401)",
            ));
        }
        if !response.status().is_success() {
            return Err(status_error(Provider::Ads, response).await);
        }

        let parsed: HistoricalMetricsResponse = response
            .json()
            .await
            .map_err(|e| AppError::transient(Provider::Ads, format!("Malformed response: {e}")))?;

        Ok(map_by_position(keywords, &parsed.results))
    }
}

/// A result present at a keyword's position yields its volume, or 0 when the
/// bridge has no volume for it. A missing position yields `None`.
fn map_by_position(
    keywords: &[Keyword],
    results: &[HistoricalMetricsResult],
) -> HashMap<Keyword, Option<i64>> {
    keywords
        .iter()
        .enumerate()
        .map(|(i, keyword)| {
            let volume = results.get(i).map(|result| {
                result
                    .keyword_metrics
                    .as_ref()
                    .and_then(|m| m.avg_monthly_searches.as_ref())
                    .and_then(Int64::value)
                    .unwrap_or(0)
            });
            (keyword.clone(), volume)
        })
        .collect()
}
