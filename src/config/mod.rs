//! Configuration management for redmoon
//!
//! The configuration file lives in the platform config directory
//! (`~/.config/redmoon/config.toml` on Linux). Every section is optional;
//! a missing file yields a catalog backed by the offline `sim` adapter.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! session_ttl_secs = 3600
//!
//! [[chat_models]]
//! id = "mistral-small"
//! name = "Mistral Small"
//! websearch = false
//! backend = "venice"
//!
//! [backends.venice]
//! kind = "openai_compat"
//! url = "https://example.invalid/v1/chat/completions"
//! api_key_env = "VENICE_API_KEY"
//! model = "mistral-31-24b"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub chat_models: Vec<ChatModelConfig>,
    pub image_models: Vec<ImageModelConfig>,
    pub backends: BTreeMap<String, BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert("sim".to_string(), BackendConfig::Sim(SimConfig::default()));

        Self {
            server: ServerConfig::default(),
            chat_models: vec![
                ChatModelConfig {
                    id: "default".to_string(),
                    name: "Default".to_string(),
                    websearch: false,
                    backend: "sim".to_string(),
                },
                ChatModelConfig {
                    id: "search".to_string(),
                    name: "Search".to_string(),
                    websearch: true,
                    backend: "sim".to_string(),
                },
            ],
            image_models: vec![ImageModelConfig {
                id: "flux-schnell".to_string(),
                name: "Flux Schnell".to_string(),
                provider: "Simulated".to_string(),
                backend: "sim".to_string(),
            }],
            backends,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Idle sessions are dropped after this many seconds; 0 keeps them forever
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            session_ttl_secs: 3600,
        }
    }
}

/// A chat model entry of the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatModelConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub websearch: bool,
    /// Key into `[backends]`
    pub backend: String,
}

/// An image model entry of the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageModelConfig {
    pub id: String,
    pub name: String,
    /// Display name of the service behind the model
    pub provider: String,
    /// Key into `[backends]`
    pub backend: String,
}

/// Adapter configuration, selected by `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Sim(SimConfig),
    OpenaiCompat(OpenAiCompatBackend),
    ImageJson(ImageJsonBackend),
    ImageBinary(ImageBinaryBackend),
}

/// Offline adapter used by the default catalog
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimConfig {
    /// Artificial latency before answering, in milliseconds
    pub delay_ms: u64,
}

/// Settings shared by every HTTP adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    /// Retries on connection failures (not on error responses)
    pub max_retries: u32,
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_retries: 3,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatBackend {
    pub url: String,
    /// Upstream model name; defaults to the catalog id
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// Request body key that carries the web-search flag
    #[serde(default)]
    pub websearch_field: Option<String>,
    #[serde(flatten)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJsonBackend {
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Response field holding the image URL (a string or an array of strings)
    #[serde(default = "default_url_field")]
    pub url_field: String,
    /// Extra static fields merged into the request body
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    #[serde(flatten)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBinaryBackend {
    pub url: String,
    /// Extra static form fields sent with the prompt
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    #[serde(flatten)]
    pub http: HttpSettings,
}

fn default_url_field() -> String {
    "output".to_string()
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("No config at {:?}, using built-in catalog", config_path);
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every model points at a configured backend and ids are unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let chat = self.chat_models.iter().map(|m| (&m.id, &m.backend));
        let image = self.image_models.iter().map(|m| (&m.id, &m.backend));
        for (id, backend) in chat.chain(image) {
            if !seen.insert(id.as_str()) {
                anyhow::bail!("Duplicate model id: {}", id);
            }
            if !self.backends.contains_key(backend) {
                anyhow::bail!("Model {} uses unknown backend '{}'", id, backend);
            }
        }
        Ok(())
    }

    /// Directory holding config.toml and the UI preferences
    pub fn config_dir() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "redmoon") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.to_path_buf())
        } else {
            Ok(PathBuf::from("."))
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }
}
