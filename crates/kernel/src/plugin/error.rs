//! Plugin management error types with clear, actionable messages.

use thiserror::Error;

/// Errors that can occur while managing vendored plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin was not found in any configured source repository.
    #[error("plugin '{plugin}' not found in any source. Checked: {sources}")]
    NotFound { plugin: String, sources: String },

    /// The vendored directory already exists.
    #[error("plugin '{plugin}' is already installed at {path}. Remove it first or use update")]
    AlreadyInstalled { plugin: String, path: String },

    /// The plugin is not vendored locally.
    #[error("plugin '{plugin}' is not installed")]
    NotInstalled { plugin: String },

    /// An HTTP fetch against a source repository failed.
    #[error("failed to fetch {url}: {details}")]
    Fetch { url: String, details: String },

    /// A git subprocess failed.
    #[error("git {operation} failed for '{plugin}': {details}")]
    Git {
        operation: String,
        plugin: String,
        details: String,
    },

    /// A file-system operation on the vendor directory failed.
    #[error("file operation on {path} failed: {details}")]
    Io { path: String, details: String },

    /// A URL argument could not be parsed.
    #[error("invalid repository URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },
}

impl PluginError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            details: err.to_string(),
        }
    }
}
