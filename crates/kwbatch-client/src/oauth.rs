//! OAuth refresh-token exchange for the ads API.
//!
//! The ads API wants a short-lived access token as the bearer credential.
//! [`AccessTokenSource`] trades the long-lived refresh token for one at the
//! token endpoint and reuses it until shortly before it expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kwbatch_core::error::AppError;
use kwbatch_core::models::Provider;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::http::{status_error, transport_error};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// OAuth client registration plus the user's refresh token.
#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

struct Inner {
    http: Client,
    token_url: Url,
    oauth: OAuthClient,
    cached: Mutex<Option<CachedToken>>,
}

/// Cached access tokens obtained by refresh-token exchange. Cloning shares the cache.
#[derive(Clone)]
pub struct AccessTokenSource {
    inner: Arc<Inner>,
}

impl AccessTokenSource {
    pub fn new(http: Client, token_url: Url, oauth: OAuthClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                token_url,
                oauth,
                cached: Mutex::new(None),
            }),
        }
    }

    /// A valid access token, exchanging the refresh token when needed.
    ///
    /// Concurrent callers wait on one exchange instead of racing.
    pub async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.inner.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + EXPIRY_MARGIN
        {
            return Ok(token.value.clone());
        }

        let fresh = self.exchange().await?;
        let lifetime = fresh
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        tracing::debug!(
            target: "kwbatch::ads",
            expires_in_secs = lifetime.as_secs(),
            "Access token refreshed"
        );
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }

    /// Drop the cached token, e.g. after the API rejected it.
    pub async fn invalidate(&self) {
        *self.inner.cached.lock().await = None;
    }

    async fn exchange(&self) -> Result<TokenResponse, AppError> {
        let oauth = &self.inner.oauth;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", &oauth.client_id)
            .append_pair("client_secret", &oauth.client_secret)
            .append_pair("refresh_token", &oauth.refresh_token)
            .finish();

        let response = self
            .inner
            .http
            .post(self.inner.token_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Ads, e))?;
        if !response.status().is_success() {
            return Err(match status_error(Provider::Ads, response).await {
                AppError::ProviderFatal { message, .. } => {
                    AppError::fatal(Provider::Ads, format!("Token exchange rejected: {message}"))
                }
                other => other,
            });
        }

        response.json().await.map_err(|e| {
            AppError::transient(Provider::Ads, format!("Malformed token response: {e}"))
        })
    }
}
