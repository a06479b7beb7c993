//! Per-connection session state
//!
//! Pure state: nothing here performs I/O. The dispatcher owns the in-flight
//! flag, the presentation controller owns mode and theme.

use std::sync::{Arc, Mutex, MutexGuard};

use super::catalog::Catalog;
use super::errors::DispatchError;
use super::renderer::ImageArea;
use super::types::{Message, Mode, Role, Theme};

/// A session shared between a transport and in-flight requests.
///
/// The lock is only ever held for short synchronous sections.
pub type SharedSession = Arc<Mutex<Session>>;

/// Lock a shared session, recovering the state if a holder panicked
pub fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
pub struct Session {
    catalog: Arc<Catalog>,
    active_mode: Mode,
    active_chat_model: Option<String>,
    active_image_model: Option<String>,
    chat_transcript: Vec<Message>,
    theme: Theme,
    request_in_flight: bool,
    websearch: bool,
    image_area: ImageArea,
    /// Bumped on every transcript clear; replies carry the value they started with
    epoch: u64,
}

impl Session {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            active_mode: Mode::default(),
            active_chat_model: None,
            active_image_model: None,
            chat_transcript: Vec::new(),
            theme: Theme::default(),
            request_in_flight: false,
            websearch: false,
            image_area: ImageArea::Idle,
            epoch: 0,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Make `model_id` the active model for `mode`.
    ///
    /// Switching to a different chat model starts a fresh transcript.
    pub fn select_model(&mut self, mode: Mode, model_id: &str) -> Result<(), DispatchError> {
        if !self.catalog.contains(mode, model_id) {
            return Err(DispatchError::invalid(format!(
                "Unknown {} model: {}",
                mode, model_id
            )));
        }

        let slot = match mode {
            Mode::Chat => &mut self.active_chat_model,
            Mode::Image => &mut self.active_image_model,
        };
        if slot.as_deref() == Some(model_id) {
            return Ok(());
        }
        let previous = slot.replace(model_id.to_string());

        if mode == Mode::Chat && previous.is_some() {
            self.clear_transcript();
        }
        self.websearch = false;
        tracing::debug!("Selected {} model {}", mode, model_id);
        Ok(())
    }

    pub fn append_message(&mut self, role: Role, content: impl Into<String>) {
        self.chat_transcript.push(Message::new(role, content));
    }

    pub fn clear_transcript(&mut self) {
        self.chat_transcript.clear();
        self.epoch += 1;
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.request_in_flight = in_flight;
    }

    pub fn is_in_flight(&self) -> bool {
        self.request_in_flight
    }

    /// Turn web search on or off for the active chat model
    pub fn set_websearch(&mut self, enabled: bool) -> Result<(), DispatchError> {
        if !self.active_chat_supports_websearch() {
            return Err(DispatchError::invalid(
                "The selected model does not support web search",
            ));
        }
        self.websearch = enabled;
        Ok(())
    }

    /// Toggle value to send upstream; `None` when the capability is absent
    pub fn websearch_flag(&self) -> Option<bool> {
        self.active_chat_supports_websearch()
            .then_some(self.websearch)
    }

    fn active_chat_supports_websearch(&self) -> bool {
        self.active_chat_model
            .as_deref()
            .and_then(|id| self.catalog.chat_model(id))
            .map(|m| m.supports_websearch)
            .unwrap_or(false)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.active_mode = mode;
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    pub fn set_image_area(&mut self, area: ImageArea) {
        self.image_area = area;
    }

    pub fn mode(&self) -> Mode {
        self.active_mode
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn active_chat_model(&self) -> Option<&str> {
        self.active_chat_model.as_deref()
    }

    pub fn active_image_model(&self) -> Option<&str> {
        self.active_image_model.as_deref()
    }

    /// Active model for a mode
    pub fn active_model(&self, mode: Mode) -> Option<&str> {
        match mode {
            Mode::Chat => self.active_chat_model(),
            Mode::Image => self.active_image_model(),
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.chat_transcript
    }

    pub fn image_area(&self) -> &ImageArea {
        &self.image_area
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
