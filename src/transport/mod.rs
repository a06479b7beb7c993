//! Transport layer for the CLI menu and the HTTP API

pub mod cli;
pub mod http;
