//! Domain error types
//!
//! `DispatchError` is what a send, generate or clear request can fail with.
//! Provider adapters report `LlmError`; the conversion below decides which
//! of those failures the user sees verbatim.

use thiserror::Error;

use crate::llm::LlmError;

/// Shown instead of the raw cause when no usable response arrived
pub const RETRY_MESSAGE: &str = "Could not reach the service. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A local precondition failed; nothing was sent
    #[error("{0}")]
    InvalidRequest(String),

    /// The service answered with a structured failure
    #[error("{0}")]
    Provider(String),

    /// No usable response (connection failure, timeout, unreadable body)
    #[error("Transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        DispatchError::InvalidRequest(reason.into())
    }

    /// Text to show the user; transport causes stay in the logs
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::InvalidRequest(reason) => reason.clone(),
            DispatchError::Provider(message) => message.clone(),
            DispatchError::Transport(_) => RETRY_MESSAGE.to_string(),
        }
    }
}

impl From<LlmError> for DispatchError {
    fn from(err: LlmError) -> Self {
        if err.is_provider_failure() {
            DispatchError::Provider(err.to_string())
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}
