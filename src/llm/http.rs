//! HTTP plumbing shared by the network adapters

use super::LlmError;
use crate::config::HttpSettings;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Build a client carrying the backend's timeout and static headers
pub(crate) fn build_client(settings: &HttpSettings) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name '{}'", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header '{}'", name))?;
        headers.insert(name, value);
    }

    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

/// Read a secret from the environment variable named in the config
pub(crate) fn api_key_from_env(var: Option<&str>) -> Result<Option<String>> {
    match var {
        None => Ok(None),
        Some(var) => std::env::var(var)
            .map(Some)
            .with_context(|| format!("{} environment variable not set", var)),
    }
}

/// Send a request, retrying connection failures with a linear backoff.
///
/// Non-2xx answers are never retried; they come back as typed errors.
pub(crate) async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<reqwest::Response, LlmError> {
    let mut attempt = 0;
    loop {
        let this_try = match request.try_clone() {
            Some(r) if attempt < max_retries => r,
            // Last attempt, or a streaming body that cannot be replayed
            _ => return check_status(request.send().await).await,
        };

        match check_status(this_try.send().await).await {
            Err(e) if e.is_retryable() => {
                attempt += 1;
                tracing::warn!("Request failed ({}), retry {}/{}", e, attempt, max_retries);
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
            other => return other,
        }
    }
}

async fn check_status(
    sent: reqwest::Result<reqwest::Response>,
) -> Result<reqwest::Response, LlmError> {
    let response = sent.map_err(LlmError::from_network_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::from_http_status(status, body))
}
