//! Plugin management for Binario.
//!
//! This module handles:
//! - Scanning the vendored plugin directory and its `plugin.toml` metadata
//! - The configured list of plugin source repositories
//! - Fetching, installing, updating, and removing vendored plugins
//! - The `binario` CLI command bodies

pub mod cli;
mod error;
mod repository;
mod sources;
mod vendored;

pub use error::PluginError;
pub use repository::{Repository, discover_repositories, install, remove, update};
pub use sources::{DEFAULT_SOURCES, SourceRegistry};
pub use vendored::{PluginAbout, VendoredPlugin, discover_vendored, find_vendored};
