//! Generic OpenAI-compatible chat adapter
//!
//! Works with any service that accepts the `chat/completions` request shape.
//! The conversation context lives here, per model id, the way the hosted
//! chat services keep it; `clear_context` drops it.
//!
//! SECURITY: the API key is only sent to the configured endpoint.

use super::http::{api_key_from_env, build_client, send_with_retry};
use super::{ChatReply, ChatRequest, LlmError, Message, Provider};
use crate::config::OpenAiCompatBackend;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatProvider {
    name: String,
    client: reqwest::Client,
    url: String,
    model: Option<String>,
    api_key: Option<String>,
    system_prompt: Option<String>,
    max_tokens: Option<usize>,
    websearch_field: Option<String>,
    max_retries: u32,
    /// Server-held conversation per model id
    history: Mutex<HashMap<String, Vec<Message>>>,
}

impl OpenAiCompatProvider {
    pub fn from_config(name: &str, config: &OpenAiCompatBackend) -> Result<Self> {
        url::Url::parse(&config.url)
            .with_context(|| format!("Invalid url for backend '{}'", name))?;

        Ok(Self {
            name: name.to_string(),
            client: build_client(&config.http)?,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: api_key_from_env(config.api_key_env.as_deref())?,
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            websearch_field: config.websearch_field.clone(),
            max_retries: config.http.max_retries,
            history: Mutex::new(HashMap::new()),
        })
    }

    fn history_for(&self, model_id: &str) -> Vec<Message> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.get(model_id).cloned().unwrap_or_default()
    }

    fn build_request<'a>(&'a self, request: &'a ChatRequest) -> OpenAiRequest<'a> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.extend(self.history_for(&request.model_id));
        messages.push(Message::user(request.message.clone()));

        let mut extra = serde_json::Map::new();
        if let (Some(field), Some(enabled)) = (&self.websearch_field, request.websearch) {
            extra.insert(field.clone(), serde_json::Value::Bool(enabled));
        }

        OpenAiRequest {
            model: self.model.as_deref().unwrap_or(&request.model_id),
            messages,
            max_tokens: self.max_tokens,
            stream: false,
            extra,
        }
    }
}

/// Pull the assistant text out of a completions response body
fn parse_reply(body: &str) -> Result<String, LlmError> {
    let response: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))?;

    if let Some(error) = response.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(LlmError::Rejected(message));
    }

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::Malformed("response has no message content".to_string()))
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let body = self.build_request(request);
        tracing::debug!(
            "{} -> {} ({} messages)",
            self.name,
            body.model,
            body.messages.len()
        );

        let mut http = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = send_with_retry(http, self.max_retries).await?;
        let text = response
            .text()
            .await
            .map_err(LlmError::from_network_error)?;
        let reply = parse_reply(&text)?;

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let turns = history.entry(request.model_id.clone()).or_default();
        turns.push(Message::user(request.message.clone()));
        turns.push(Message::assistant(reply.clone()));

        Ok(ChatReply::new(reply))
    }

    async fn clear_context(&self, model_id: &str) -> Result<(), LlmError> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.remove(model_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;

    fn provider(websearch_field: Option<&str>) -> OpenAiCompatProvider {
        OpenAiCompatProvider::from_config(
            "test",
            &OpenAiCompatBackend {
                url: "https://api.example.com/v1/chat/completions".to_string(),
                model: None,
                api_key_env: None,
                system_prompt: Some("Be brief".to_string()),
                max_tokens: Some(512),
                websearch_field: websearch_field.map(str::to_string),
                http: HttpSettings::default(),
            },
        )
        .unwrap()
    }

    fn request(websearch: Option<bool>) -> ChatRequest {
        ChatRequest {
            model_id: "mistral-small".to_string(),
            message: "Hello".to_string(),
            websearch,
        }
    }

    #[test]
    fn test_request_body() {
        let p = provider(Some("web_search"));
        let req = request(Some(true));
        let body = serde_json::to_value(p.build_request(&req)).unwrap();

        assert_eq!(body["model"], "mistral-small");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["web_search"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_websearch_omitted_without_capability() {
        let p = provider(Some("web_search"));
        let req = request(None);
        let body = serde_json::to_value(p.build_request(&req)).unwrap();
        assert!(body.get("web_search").is_none());

        let p = provider(None);
        let req = request(Some(true));
        let body = serde_json::to_value(p.build_request(&req)).unwrap();
        assert!(body.get("web_search").is_none());
    }

    #[tokio::test]
    async fn test_history_included_until_cleared() {
        let p = provider(None);
        p.history.lock().unwrap().insert(
            "mistral-small".to_string(),
            vec![Message::user("earlier"), Message::assistant("reply")],
        );
        assert_eq!(p.build_request(&request(None)).messages.len(), 4);

        p.clear_context("mistral-small").await.unwrap();
        assert_eq!(p.build_request(&request(None)).messages.len(), 2);
    }

    #[test]
    fn test_parse_reply() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}]}"#;
        assert_eq!(parse_reply(ok).unwrap(), "hi there");

        let err = r#"{"error":{"message":"model overloaded"}}"#;
        assert!(matches!(parse_reply(err), Err(LlmError::Rejected(m)) if m == "model overloaded"));

        assert!(matches!(parse_reply("<html>"), Err(LlmError::Malformed(_))));
        assert!(matches!(
            parse_reply(r#"{"choices":[]}"#),
            Err(LlmError::Malformed(_))
        ));
    }
}
