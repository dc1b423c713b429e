use std::time::Duration;

use kwbatch_core::error::AppError;
use kwbatch_core::models::Provider;
use reqwest::{Client, Response, StatusCode};
use url::Url;

const USER_AGENT: &str = concat!("kwbatch/", env!("CARGO_PKG_VERSION"));

/// Markers of a rate-limit or bot-challenge page.
const CHALLENGE_MARKERS: [&str; 4] = ["captcha", "429", "quota", "too many requests"];

pub(crate) fn build_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Http(e.to_string()))
}

/// Parse an absolute http(s) URL.
pub(crate) fn parse_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw).map_err(|e| AppError::Config(format!("Invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(AppError::Config(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

/// Parse a bridge base URL, making sure relative joins keep its path.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, AppError> {
    let mut url = parse_url(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, AppError> {
    base.join(path)
        .map_err(|e| AppError::Config(format!("Invalid endpoint '{path}': {e}")))
}

/// True if the text looks like a rate-limit or challenge response.
pub fn is_challenge(text: &str) -> bool {
    let lower = text.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Map a transport-level failure. Network trouble is worth retrying.
pub(crate) fn transport_error(provider: Provider, e: reqwest::Error) -> AppError {
    let message = if e.is_timeout() {
        format!("Request timed out: {e}")
    } else if e.is_connect() {
        format!("Connection failed: {e}")
    } else {
        e.to_string()
    };
    if is_challenge(&message) {
        return AppError::fatal(provider, message);
    }
    AppError::transient(provider, message)
}

/// Map a non-success response.
///
/// 429, auth failures, challenge pages and other client errors are fatal;
/// 408 and 5xx are transient.
pub(crate) async fn status_error(provider: Provider, response: Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200));

    if status == StatusCode::TOO_MANY_REQUESTS || is_challenge(&body) {
        return AppError::fatal(provider, message);
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return AppError::transient(provider, message);
    }
    AppError::fatal(provider, message)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
