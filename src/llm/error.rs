//! Typed errors for provider adapters
//!
//! Adapters report what went wrong without string matching; the dispatcher
//! folds these into the user-facing `ProviderError` / `TransportError` split.

use thiserror::Error;

/// Provider operation errors with typed variants
///
/// - `Unauthorized` (401/403) - credentials rejected
/// - `RateLimited` (429) - quota exceeded
/// - `BadRequest` (400) - the service refused the payload
/// - `ServiceError` (5xx) - server-side issue
/// - `Rejected` - the service answered 2xx with an error body
/// - `Network` - connection/timeout; retryable
/// - `Malformed` - a response arrived but could not be understood
/// - `Other` - catch-all
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    /// Structured failure reported inside an otherwise successful response
    #[error("{0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Check if a retry after a short delay may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_))
    }

    /// True when the service was reached and answered with a structured failure.
    ///
    /// Everything else means no usable response came back.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            LlmError::Unauthorized(_)
                | LlmError::RateLimited(_)
                | LlmError::BadRequest(_)
                | LlmError::ServiceError(_)
                | LlmError::Rejected(_)
        )
    }

    /// Convert HTTP status code and error text into typed LlmError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        let error_text = extract_error_message(&error_text);
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Rejected(format!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() || e.is_request() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            Self::from_http_status(status, e.to_string())
        } else if e.is_decode() || e.is_body() {
            LlmError::Malformed(e.to_string())
        } else {
            LlmError::Other(e.into())
        }
    }
}

/// Pull a readable message out of a JSON error body, falling back to the raw text
fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let candidates = [
        value.pointer("/error/message"),
        value.get("error"),
        value.get("message"),
        value.get("detail"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str())
        .map(str::to_string);
    message.unwrap_or_else(|| body.trim().to_string())
}
