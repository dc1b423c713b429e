use std::sync::Arc;

use kwbatch_core::error::AppError;
use kwbatch_core::models::{Keyword, Provider};
use kwbatch_core::traits::{Credentials, TrendScoreProvider};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::TrendsBridgeConfig;
use crate::http::{build_client, endpoint, is_challenge, status_error, transport_error};

/// Interest-over-time scores from the trends bridge, one keyword per call.
#[derive(Clone)]
pub struct HttpTrendScoreProvider {
    client: Client,
    url: Url,
    geo: String,
    timeframe: String,
    credentials: Arc<Credentials>,
}

#[derive(Debug, Deserialize)]
struct InterestOverTime {
    #[serde(default)]
    points: Vec<InterestPoint>,
}

#[derive(Debug, Deserialize)]
struct InterestPoint {
    value: f64,
}

impl HttpTrendScoreProvider {
    pub fn new(config: &TrendsBridgeConfig, credentials: Credentials) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            url: endpoint(&config.base_url, "interest-over-time")?,
            geo: config.geo.clone(),
            timeframe: config.timeframe.clone(),
            credentials: Arc::new(credentials),
        })
    }

    fn request_url(&self, keyword: &Keyword) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("keyword", keyword.as_str())
            .append_pair("geo", &self.geo)
            .append_pair("timeframe", &self.timeframe);
        url
    }
}

impl TrendScoreProvider for HttpTrendScoreProvider {
    async fn fetch_one(&self, keyword: &Keyword) -> Result<Option<f64>, AppError> {
        let mut request = self.client.get(self.request_url(keyword));
        if !self.credentials.secret.is_empty() {
            request = request.header("x-api-key", &self.credentials.secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(Provider::Trends, e))?;
        if !response.status().is_success() {
            return Err(status_error(Provider::Trends, response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| transport_error(Provider::Trends, e))?;
        let series: InterestOverTime = serde_json::from_str(&text).map_err(|e| {
            // Challenge pages are served with 200 and an HTML body.
            if is_challenge(&text) {
                AppError::fatal(Provider::Trends, "Challenge page returned")
            } else {
                AppError::transient(Provider::Trends, format!("Malformed response: {e}"))
            }
        })?;

        Ok(Some(mean_score(&series.points)))
    }
}

/// Mean of the series. An empty series scores 0.
fn mean_score(points: &[InterestPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64
}
