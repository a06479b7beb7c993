//! Offline simulation adapter
//!
//! Backs the built-in catalog so the server and CLI work without network
//! access or API keys. Answers are deterministic: chat echoes the message
//! with the turn number, images are a 1x1 PNG returned inline.

use super::{ChatReply, ChatRequest, ImageRequest, ImageResult, LlmError, Provider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Smallest valid PNG: one transparent pixel
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub struct SimProvider {
    name: String,
    delay_ms: u64,
    /// Turns seen per model since the last clear
    turns: Mutex<HashMap<String, usize>>,
}

impl SimProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay_ms: 0,
            turns: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }

    fn next_turn(&self, model_id: &str) -> usize {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let turn = turns.entry(model_id.to_string()).or_insert(0);
        *turn += 1;
        *turn
    }
}

#[async_trait]
impl Provider for SimProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        self.pause().await;
        let turn = self.next_turn(&request.model_id);
        let mut text = format!(
            "**{}** (turn {}): you said\n\n> {}",
            request.model_id,
            turn,
            request.message.trim()
        );
        if request.websearch == Some(true) {
            text.push_str("\n\n*Web search is on, but this simulated model has no index.*");
        }
        Ok(ChatReply::new(text))
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResult, LlmError> {
        self.pause().await;
        tracing::debug!(
            "sim image for {} ({}): {}",
            request.model_id,
            request.aspect_ratio,
            request.prompt
        );
        Ok(ImageResult::Inline {
            data: PIXEL_PNG.to_vec(),
            content_type: "image/png".to_string(),
        })
    }

    async fn clear_context(&self, model_id: &str) -> Result<(), LlmError> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.remove(model_id);
        Ok(())
    }
}
