//! redmoon: one front end for several third-party AI chat and image services
//!
//! This library provides:
//! - Session state with an active model per mode and a chat transcript
//! - A dispatcher that allows one outstanding provider request per session
//! - Rendering of replies, images and errors into display units
//! - Configurable provider adapters (OpenAI-style chat, JSON and binary image endpoints)
//! - An HTTP API for the web UI and an interactive CLI menu

pub mod config;
pub mod core;
pub mod llm;
pub mod transport;

pub use config::Config;
pub use crate::core::{DispatchError, Dispatcher, Session};
pub use llm::{Provider, ProviderRegistry};
