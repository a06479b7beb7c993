//! Provider adapters
//!
//! Each configured backend becomes one adapter instance. The registry maps
//! catalog model ids onto those instances so the dispatcher never has to
//! know which service sits behind a model.

mod error;
mod http;
mod image_http;
mod openai_compat;
mod sim;
mod types;

pub use error::LlmError;
pub use image_http::{ImageBinaryProvider, ImageJsonProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use sim::SimProvider;
pub use types::*;

use crate::config::{BackendConfig, Config};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for provider adapters
///
/// Implementations must be safe to share between sessions; any
/// conversation context they hold is keyed by model id.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the adapter name (for logs)
    fn name(&self) -> &str;

    /// Send one chat message and wait for the complete reply
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        Err(LlmError::Rejected(format!(
            "{} cannot answer chat messages for {}",
            self.name(),
            request.model_id
        )))
    }

    /// Generate one image
    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResult, LlmError> {
        Err(LlmError::Rejected(format!(
            "{} cannot generate images for {}",
            self.name(),
            request.model_id
        )))
    }

    /// Discard any conversation context held for `model_id`
    ///
    /// Default is a no-op for stateless adapters.
    async fn clear_context(&self, model_id: &str) -> Result<(), LlmError> {
        let _ = model_id;
        Ok(())
    }
}

/// Create an adapter from its backend configuration
pub fn create_provider(name: &str, backend: &BackendConfig) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match backend {
        BackendConfig::Sim(cfg) => Arc::new(SimProvider::new(name).with_delay_ms(cfg.delay_ms)),
        BackendConfig::OpenaiCompat(cfg) => Arc::new(OpenAiCompatProvider::from_config(name, cfg)?),
        BackendConfig::ImageJson(cfg) => Arc::new(ImageJsonProvider::from_config(name, cfg)?),
        BackendConfig::ImageBinary(cfg) => Arc::new(ImageBinaryProvider::from_config(name, cfg)?),
    };
    Ok(provider)
}

/// Maps model ids to the adapter that serves them
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per backend and bind every catalog model to its backend
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut backends: HashMap<&str, Arc<dyn Provider>> = HashMap::new();
        for (name, backend) in &config.backends {
            let provider = create_provider(name, backend)
                .with_context(|| format!("Failed to set up backend '{}'", name))?;
            backends.insert(name.as_str(), provider);
        }

        let mut registry = Self::new();
        let bindings = config
            .chat_models
            .iter()
            .map(|m| (&m.id, &m.backend))
            .chain(config.image_models.iter().map(|m| (&m.id, &m.backend)));
        for (model_id, backend) in bindings {
            let provider = backends
                .get(backend.as_str())
                .with_context(|| format!("Model {} uses unknown backend '{}'", model_id, backend))?;
            registry.register(model_id.clone(), Arc::clone(provider));
        }

        tracing::debug!(
            "Provider registry ready: {} models on {} backends",
            registry.len(),
            backends.len()
        );
        Ok(registry)
    }

    pub fn register(&mut self, model_id: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(model_id.into(), provider);
    }

    pub fn with_provider(mut self, model_id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(model_id, provider);
        self
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(model_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
