//! Response renderer
//!
//! Records settled results in the session and turns session state into the
//! view both transports display. Transcript entries keep their raw text;
//! markdown is applied when a view is built, and only to assistant text.
//!
//! The image area only reflects requests that reached a provider. A request
//! rejected before dispatch is reported to its caller alone and leaves the
//! image area as it was, so an [`ImageArea::Alert`] always carries a provider
//! or transport failure.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::errors::DispatchError;
use super::markdown;
use super::presentation::{status_text, Palette, Picker};
use super::session::Session;
use super::types::{Message, Mode, Role, Theme};
use crate::llm::ImageResult;

fn as_base64<S: Serializer, T: AsRef<[u8]>>(data: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data.as_ref()))
}

/// One rendered transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayUnit {
    pub role: Role,
    /// Safe HTML fragment
    pub html: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for DisplayUnit {
    fn from(message: &Message) -> Self {
        let html = match message.role {
            Role::Assistant => markdown::to_html(&message.content),
            Role::User | Role::Error => markdown::escape_html(&message.content),
        };
        Self {
            role: message.role,
            html,
            timestamp: message.timestamp,
        }
    }
}

/// A generated image, as returned by the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageUnit {
    Url {
        url: String,
    },
    Inline {
        content_type: String,
        #[serde(serialize_with = "as_base64")]
        data: Vec<u8>,
    },
}

impl ImageUnit {
    pub fn url(&self) -> Option<&str> {
        match self {
            ImageUnit::Url { url } => Some(url),
            ImageUnit::Inline { .. } => None,
        }
    }

    /// Base64 payload of an inline image
    pub fn inline_base64(&self) -> Option<String> {
        match self {
            ImageUnit::Url { .. } => None,
            ImageUnit::Inline { data, .. } => Some(STANDARD.encode(data)),
        }
    }

    /// Something an `<img src>` accepts
    pub fn src(&self) -> String {
        match self {
            ImageUnit::Url { url } => url.clone(),
            ImageUnit::Inline { content_type, data } => {
                format!("data:{};base64,{}", content_type, STANDARD.encode(data))
            }
        }
    }
}

impl From<ImageResult> for ImageUnit {
    fn from(result: ImageResult) -> Self {
        match result {
            ImageResult::Url(url) => ImageUnit::Url { url },
            ImageResult::Inline { data, content_type } => ImageUnit::Inline { content_type, data },
        }
    }
}

/// Last settled outcome of the image surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImageArea {
    #[default]
    Idle,
    Ready { image: ImageUnit },
    Alert { message: String },
}

/// Everything a client needs to draw the session
#[derive(Debug, Clone, Serialize)]
pub struct View {
    pub mode: Mode,
    pub theme: Theme,
    pub palette: Palette,
    pub status: String,
    pub active_chat_model: Option<String>,
    pub active_image_model: Option<String>,
    /// `None` hides the web-search toggle
    pub websearch: Option<bool>,
    pub units: Vec<DisplayUnit>,
    /// Loading indicator; never part of the transcript
    pub typing: bool,
    pub image_area: ImageArea,
    /// Dropdown currently open; set by the presentation controller
    pub open_picker: Option<Picker>,
}

pub fn render_view(session: &Session) -> View {
    View {
        mode: session.mode(),
        theme: session.theme(),
        palette: Palette::for_theme(session.theme()),
        status: status_text(session),
        active_chat_model: session.active_chat_model().map(str::to_string),
        active_image_model: session.active_image_model().map(str::to_string),
        websearch: session.websearch_flag(),
        units: session.transcript().iter().map(DisplayUnit::from).collect(),
        typing: session.is_in_flight(),
        image_area: session.image_area().clone(),
        open_picker: None,
    }
}

pub fn record_reply(session: &mut Session, text: &str) {
    session.append_message(Role::Assistant, text);
}

pub fn record_failure(session: &mut Session, err: &DispatchError) {
    session.append_message(Role::Error, err.user_message());
}

pub fn record_image(session: &mut Session, result: ImageResult) -> ImageUnit {
    let unit = ImageUnit::from(result);
    session.set_image_area(ImageArea::Ready {
        image: unit.clone(),
    });
    unit
}

pub fn record_image_failure(session: &mut Session, err: &DispatchError) {
    session.set_image_area(ImageArea::Alert {
        message: err.user_message(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::catalog::Catalog;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(Arc::new(Catalog::from_config(&Config::default())))
    }

    #[test]
    fn test_only_assistant_text_is_markdown() {
        let mut s = session();
        s.append_message(Role::User, "**hi** <b>");
        record_reply(&mut s, "**hi**");
        record_failure(&mut s, &DispatchError::Provider("<oops>".into()));

        let view = render_view(&s);
        assert_eq!(view.units[0].html, "**hi** &lt;b&gt;");
        assert_eq!(view.units[1].html, "<strong>hi</strong>");
        assert_eq!(view.units[2].html, "&lt;oops&gt;");
        assert_eq!(view.units[2].role, Role::Error);
    }

    #[test]
    fn test_typing_follows_in_flight() {
        let mut s = session();
        assert!(!render_view(&s).typing);
        s.set_in_flight(true);
        let view = render_view(&s);
        assert!(view.typing);
        assert!(view.units.is_empty());
    }

    #[test]
    fn test_inline_image_serializes_as_base64() {
        let unit = ImageUnit::from(ImageResult::Inline {
            data: b"png".to_vec(),
            content_type: "image/png".into(),
        });
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["kind"], "inline");
        assert_eq!(json["data"], "cG5n");
        assert_eq!(unit.src(), "data:image/png;base64,cG5n");
        assert_eq!(unit.url(), None);
    }

    #[test]
    fn test_image_area_states() {
        let mut s = session();
        record_image(&mut s, ImageResult::Url("http://x/y.png".into()));
        let json = serde_json::to_value(render_view(&s).image_area).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["image"]["url"], "http://x/y.png");

        record_image_failure(&mut s, &DispatchError::Transport("reset".into()));
        assert!(matches!(s.image_area(), ImageArea::Alert { .. }));
    }
}
