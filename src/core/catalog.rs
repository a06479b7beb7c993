//! Model catalog
//!
//! Built once from configuration and shared read-only by every session.
//! The `backend` binding stays on the server; it is never serialized.

use serde::Serialize;

use super::types::Mode;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatModel {
    pub id: String,
    pub name: String,
    #[serde(rename = "websearch")]
    pub supports_websearch: bool,
    #[serde(skip)]
    pub backend: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageModel {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(skip)]
    pub backend: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub chat_models: Vec<ChatModel>,
    pub image_models: Vec<ImageModel>,
}

impl Catalog {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_models: config
                .chat_models
                .iter()
                .map(|m| ChatModel {
                    id: m.id.clone(),
                    name: m.name.clone(),
                    supports_websearch: m.websearch,
                    backend: m.backend.clone(),
                })
                .collect(),
            image_models: config
                .image_models
                .iter()
                .map(|m| ImageModel {
                    id: m.id.clone(),
                    name: m.name.clone(),
                    provider: m.provider.clone(),
                    backend: m.backend.clone(),
                })
                .collect(),
        }
    }

    pub fn chat_model(&self, id: &str) -> Option<&ChatModel> {
        self.chat_models.iter().find(|m| m.id == id)
    }

    pub fn image_model(&self, id: &str) -> Option<&ImageModel> {
        self.image_models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, mode: Mode, id: &str) -> bool {
        self.display_name(mode, id).is_some()
    }

    /// Human-readable name of a model in the given catalog
    pub fn display_name(&self, mode: Mode, id: &str) -> Option<&str> {
        match mode {
            Mode::Chat => self.chat_model(id).map(|m| m.name.as_str()),
            Mode::Image => self.image_model(id).map(|m| m.name.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_from_default_config() {
        let catalog = Catalog::from_config(&Config::default());
        assert!(catalog.contains(Mode::Chat, "default"));
        assert!(!catalog.contains(Mode::Image, "default"));
        assert_eq!(catalog.display_name(Mode::Image, "flux-schnell"), Some("Flux Schnell"));
        assert!(catalog.chat_model("search").unwrap().supports_websearch);
    }

    #[test]
    fn test_backend_is_not_serialized() {
        let catalog = Catalog::from_config(&Config::default());
        let json = serde_json::to_value(&catalog).unwrap();
        assert_eq!(json["chat_models"][0]["id"], "default");
        assert_eq!(json["chat_models"][0]["websearch"], false);
        assert!(json["chat_models"][0].get("backend").is_none());
        assert_eq!(json["image_models"][0]["provider"], "Simulated");
    }
}
