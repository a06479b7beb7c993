//! Core domain modules
//!
//! Session state, the request dispatcher, response rendering and the
//! presentation controller. Shared by the HTTP server and the CLI menu.

pub mod catalog;
pub mod dispatcher;
pub mod errors;
pub mod markdown;
pub mod presentation;
pub mod renderer;
pub mod session;
pub mod types;

pub use catalog::{Catalog, ChatModel, ImageModel};
pub use dispatcher::Dispatcher;
pub use errors::DispatchError;
pub use presentation::{
    status_text, FileThemeStore, MemoryThemeStore, Palette, Picker, PresentationController, Rgb,
    ThemeStore,
};
pub use renderer::{render_view, DisplayUnit, ImageArea, ImageUnit, View};
pub use session::{lock, Session, SharedSession};
pub use types::{Message, Mode, Role, Theme};
