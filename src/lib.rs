pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod helpers;
pub mod http;
pub mod model;
pub mod probe;
pub mod provision;
pub mod quota;
pub mod service;
pub mod uri;

pub use error::{PanelError, Result};

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
