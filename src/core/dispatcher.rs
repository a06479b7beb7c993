//! Request dispatcher
//!
//! Turns send, generate and clear intents into exactly one adapter call.
//! At most one request per session is outstanding: the in-flight flag is
//! checked and set under the session lock, and cleared by [`InFlightGuard`]
//! however the call ends, including when the future is dropped.

use std::sync::Arc;

use super::errors::DispatchError;
use super::renderer::{self, ImageArea, ImageUnit};
use super::session::{lock, SharedSession};
use super::types::{Mode, Role};
use crate::llm::{AspectRatio, ChatReply, ChatRequest, ImageRequest, Provider, ProviderRegistry};

/// Clears the in-flight flag when dropped
struct InFlightGuard {
    session: SharedSession,
}

impl InFlightGuard {
    fn new(session: &SharedSession) -> Self {
        Self {
            session: Arc::clone(session),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.session).set_in_flight(false);
    }
}

/// Whether a request must target the active model or may switch to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Require,
    Adopt,
}

struct ImageIntent<'a> {
    model_id: &'a str,
    prompt: &'a str,
    negative_prompt: Option<&'a str>,
    aspect_ratio: &'a str,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
}

impl Dispatcher {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    fn provider(&self, model_id: &str) -> Result<Arc<dyn Provider>, DispatchError> {
        self.registry.get(model_id).ok_or_else(|| {
            DispatchError::invalid(format!("No provider is configured for {}", model_id))
        })
    }

    /// Send one chat message to the active chat model.
    ///
    /// The user message is in the transcript before the call goes out. A
    /// reply that arrives after the transcript was cleared is returned but
    /// not recorded.
    pub async fn send_chat(
        &self,
        session: &SharedSession,
        model_id: &str,
        text: &str,
        websearch: Option<bool>,
    ) -> Result<ChatReply, DispatchError> {
        self.chat(session, model_id, text, websearch, Selection::Require)
            .await
    }

    /// Make `model_id` the active chat model and send, as one step.
    ///
    /// Selection happens only once every precondition holds, so a rejected
    /// request leaves the current selection and transcript untouched.
    pub async fn select_and_send_chat(
        &self,
        session: &SharedSession,
        model_id: &str,
        text: &str,
        websearch: Option<bool>,
    ) -> Result<ChatReply, DispatchError> {
        self.chat(session, model_id, text, websearch, Selection::Adopt)
            .await
    }

    async fn chat(
        &self,
        session: &SharedSession,
        model_id: &str,
        text: &str,
        websearch: Option<bool>,
        selection: Selection,
    ) -> Result<ChatReply, DispatchError> {
        let (provider, request, epoch, _guard) = {
            let mut s = lock(session);
            let text = text.trim();
            if text.is_empty() {
                return Err(DispatchError::invalid("Message cannot be empty"));
            }
            if s.is_in_flight() {
                return Err(DispatchError::invalid("A request is already in progress"));
            }
            if selection == Selection::Require && s.active_chat_model() != Some(model_id) {
                return Err(DispatchError::invalid(format!(
                    "{} is not the selected chat model",
                    model_id
                )));
            }
            let provider = self.provider(model_id)?;
            if selection == Selection::Adopt {
                s.select_model(Mode::Chat, model_id)?;
            }

            if let (Some(enabled), Some(_)) = (websearch, s.websearch_flag()) {
                s.set_websearch(enabled)?;
            }
            s.set_in_flight(true);
            let guard = InFlightGuard::new(session);
            s.append_message(Role::User, text);

            let request = ChatRequest {
                model_id: model_id.to_string(),
                message: text.to_string(),
                websearch: s.websearch_flag(),
            };
            (provider, request, s.epoch(), guard)
        };

        tracing::debug!("Chat -> {} via {}", model_id, provider.name());
        let result = provider.chat(&request).await.map_err(DispatchError::from);

        let mut s = lock(session);
        let current = s.epoch() == epoch;
        if !current {
            tracing::debug!("Transcript cleared while {} was answering; reply dropped", model_id);
        }
        match result {
            Ok(reply) => {
                if current {
                    renderer::record_reply(&mut s, &reply.text);
                }
                Ok(reply)
            }
            Err(err) => {
                log_failure("Chat", model_id, &err);
                if current {
                    renderer::record_failure(&mut s, &err);
                }
                Err(err)
            }
        }
    }

    /// Generate one image with the active image model
    pub async fn generate_image(
        &self,
        session: &SharedSession,
        model_id: &str,
        prompt: &str,
        negative_prompt: Option<&str>,
        aspect_ratio: &str,
    ) -> Result<ImageUnit, DispatchError> {
        let request = ImageIntent {
            model_id,
            prompt,
            negative_prompt,
            aspect_ratio,
        };
        self.image(session, request, Selection::Require).await
    }

    /// Make `model_id` the active image model and generate, as one step
    pub async fn select_and_generate_image(
        &self,
        session: &SharedSession,
        model_id: &str,
        prompt: &str,
        negative_prompt: Option<&str>,
        aspect_ratio: &str,
    ) -> Result<ImageUnit, DispatchError> {
        let request = ImageIntent {
            model_id,
            prompt,
            negative_prompt,
            aspect_ratio,
        };
        self.image(session, request, Selection::Adopt).await
    }

    async fn image(
        &self,
        session: &SharedSession,
        intent: ImageIntent<'_>,
        selection: Selection,
    ) -> Result<ImageUnit, DispatchError> {
        let ImageIntent {
            model_id,
            prompt,
            negative_prompt,
            aspect_ratio,
        } = intent;

        let (provider, request, _guard) = {
            let mut s = lock(session);
            let prompt = prompt.trim();
            if prompt.is_empty() {
                return Err(DispatchError::invalid("Prompt cannot be empty"));
            }
            if s.is_in_flight() {
                return Err(DispatchError::invalid("A request is already in progress"));
            }
            if selection == Selection::Require && s.active_image_model() != Some(model_id) {
                return Err(DispatchError::invalid(format!(
                    "{} is not the selected image model",
                    model_id
                )));
            }
            let aspect_ratio: AspectRatio = aspect_ratio.parse().map_err(DispatchError::InvalidRequest)?;
            let provider = self.provider(model_id)?;
            if selection == Selection::Adopt {
                s.select_model(Mode::Image, model_id)?;
            }

            s.set_in_flight(true);
            let guard = InFlightGuard::new(session);
            s.set_image_area(ImageArea::Idle);

            let request = ImageRequest {
                model_id: model_id.to_string(),
                prompt: prompt.to_string(),
                negative_prompt: negative_prompt
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
                aspect_ratio,
            };
            (provider, request, guard)
        };

        tracing::debug!(
            "Image -> {} via {} ({})",
            model_id,
            provider.name(),
            request.aspect_ratio
        );
        let result = provider
            .generate_image(&request)
            .await
            .map_err(DispatchError::from);

        let mut s = lock(session);
        match result {
            Ok(image) => Ok(renderer::record_image(&mut s, image)),
            Err(err) => {
                log_failure("Image", model_id, &err);
                renderer::record_image_failure(&mut s, &err);
                Err(err)
            }
        }
    }

    /// Clear the transcript, then ask the adapter to forget its context.
    ///
    /// The remote half is best effort: failures are logged, never returned.
    pub async fn clear(&self, session: &SharedSession, model_id: &str) -> Result<(), DispatchError> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(DispatchError::invalid("Missing model_id"));
        }

        let known = {
            let mut s = lock(session);
            s.clear_transcript();
            s.catalog().contains(Mode::Chat, model_id)
        };
        if !known {
            tracing::debug!("Cleared transcript for unknown chat model {}", model_id);
            return Ok(());
        }

        if let Some(provider) = self.registry.get(model_id) {
            if let Err(e) = provider.clear_context(model_id).await {
                tracing::warn!("Failed to clear {} context on {}: {}", model_id, provider.name(), e);
            }
        }
        Ok(())
    }
}

fn log_failure(kind: &str, model_id: &str, err: &DispatchError) {
    match err {
        DispatchError::Transport(cause) => {
            tracing::warn!("{} request to {} got no usable response: {}", kind, model_id, cause)
        }
        other => tracing::info!("{} request to {} failed: {}", kind, model_id, other),
    }
}
