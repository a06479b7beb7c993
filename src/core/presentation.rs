//! Presentation controller
//!
//! Mode and theme are independent axes. Nothing here talks to a provider;
//! the only side effect is persisting the theme through a [`ThemeStore`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

use super::renderer::{render_view, View};
use super::session::Session;
use super::types::{Mode, Theme};
use crate::config::Config;

/// Preference key the theme is stored under
pub const THEME_KEY: &str = "theme";

/// Key/value preference storage
pub trait ThemeStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Preferences kept for the lifetime of a session
#[derive(Debug, Default)]
pub struct MemoryThemeStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryThemeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThemeStore for MemoryThemeStore {
    fn load(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences in a JSON object file (`ui_prefs.json` in the config directory)
#[derive(Debug, Clone)]
pub struct FileThemeStore {
    path: PathBuf,
}

impl FileThemeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_config_dir() -> Result<Self> {
        Ok(Self::new(Config::config_dir()?.join("ui_prefs.json")))
    }

    fn read_all(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }
}

impl ThemeStore for FileThemeStore {
    fn load(&self, key: &str) -> Option<String> {
        match self.read_all() {
            Ok(values) => values.get(key).and_then(|v| v.as_str()).map(str::to_string),
            Err(e) => {
                tracing::warn!("Ignoring UI preferences: {:#}", e);
                None
            }
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        // An unreadable file is replaced rather than blocking the save
        let mut values = self.read_all().unwrap_or_default();
        values.insert(key.to_string(), serde_json::Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&values)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// An RGB color, serialized as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

/// Colors a theme resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Palette {
    pub background: Rgb,
    pub surface: Rgb,
    pub text: Rgb,
    pub muted: Rgb,
    pub accent: Rgb,
    pub user_bubble: Rgb,
    pub assistant_bubble: Rgb,
    pub error: Rgb,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self::dark(),
            Theme::Light => Self::light(),
        }
    }

    fn dark() -> Self {
        Self {
            background: Rgb(18, 18, 24),
            surface: Rgb(30, 30, 40),
            text: Rgb(230, 230, 235),
            muted: Rgb(140, 140, 155),
            accent: Rgb(200, 40, 50),
            user_bubble: Rgb(120, 25, 35),
            assistant_bubble: Rgb(42, 42, 54),
            error: Rgb(243, 139, 168),
        }
    }

    fn light() -> Self {
        Self {
            background: Rgb(250, 248, 246),
            surface: Rgb(255, 255, 255),
            text: Rgb(28, 28, 32),
            muted: Rgb(110, 110, 120),
            accent: Rgb(180, 30, 40),
            user_bubble: Rgb(250, 220, 222),
            assistant_bubble: Rgb(236, 236, 240),
            error: Rgb(210, 15, 57),
        }
    }
}

/// Dropdowns; at most one is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Picker {
    ChatModelPicker,
    ImageModelPicker,
    SideMenu,
}

impl FromStr for Picker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat_model_picker" => Ok(Picker::ChatModelPicker),
            "image_model_picker" => Ok(Picker::ImageModelPicker),
            "side_menu" => Ok(Picker::SideMenu),
            other => Err(format!("Unknown picker '{}'", other)),
        }
    }
}

/// Status line: the active model's name, or a prompt to pick one
pub fn status_text(session: &Session) -> String {
    let mode = session.mode();
    match session
        .active_model(mode)
        .and_then(|id| session.catalog().display_name(mode, id))
    {
        Some(name) => name.to_string(),
        None => match mode {
            Mode::Chat => "Select a chat model".to_string(),
            Mode::Image => "Select an image model".to_string(),
        },
    }
}

pub struct PresentationController<S: ThemeStore> {
    store: S,
    open_picker: Option<Picker>,
}

impl<S: ThemeStore> PresentationController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            open_picker: None,
        }
    }

    /// Stored theme; Dark when unset or unreadable
    pub fn stored_theme(&self) -> Theme {
        self.store
            .load(THEME_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    /// Apply the stored theme to a fresh session
    pub fn restore(&self, session: &mut Session) {
        session.set_theme(self.stored_theme());
    }

    /// Show another surface; transcripts are left alone
    pub fn switch_mode(&mut self, session: &mut Session, mode: Mode) {
        session.set_mode(mode);
        self.close_all();
    }

    pub fn set_theme(&self, session: &mut Session, theme: Theme) -> Theme {
        session.set_theme(theme);
        if let Err(e) = self.store.save(THEME_KEY, theme.as_str()) {
            tracing::warn!("Failed to persist theme: {:#}", e);
        }
        theme
    }

    pub fn toggle_theme(&self, session: &mut Session) -> Theme {
        let next = session.theme().toggled();
        self.set_theme(session, next)
    }

    pub fn open(&mut self, picker: Picker) {
        self.open_picker = Some(picker);
    }

    /// Open `picker`, or close it if it is already open
    pub fn toggle(&mut self, picker: Picker) {
        if self.open_picker == Some(picker) {
            self.open_picker = None;
        } else {
            self.open(picker);
        }
    }

    pub fn close_all(&mut self) {
        self.open_picker = None;
    }

    pub fn is_open(&self, picker: Picker) -> bool {
        self.open_picker == Some(picker)
    }

    pub fn open_picker(&self) -> Option<Picker> {
        self.open_picker
    }

    /// The session's view with this controller's open picker filled in
    pub fn render(&self, session: &Session) -> View {
        View {
            open_picker: self.open_picker,
            ..render_view(session)
        }
    }
}
