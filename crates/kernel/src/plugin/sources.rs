//! Configured plugin source repositories.
//!
//! Sources are kept one URL per line in `<root>/config/plugin_sources`.
//! When the file is absent the built-in defaults apply; the file is only
//! written once the list is changed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Repositories consulted when no sources file exists.
pub const DEFAULT_SOURCES: &[&str] = &["https://plugins.binario.dev/"];

/// The persisted list of plugin repositories.
pub struct SourceRegistry {
    path: PathBuf,
}

impl SourceRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join("config").join("plugin_sources"),
        }
    }

    /// The configured sources, or the defaults when none are configured.
    pub fn read(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no sources file, using defaults");
            return Ok(DEFAULT_SOURCES.iter().map(|s| (*s).to_string()).collect());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read sources file {}", self.path.display()))?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect())
    }

    /// Add a source URL. Returns false when it was already present.
    pub fn add(&self, url: &str) -> Result<bool> {
        let mut sources = self.read()?;
        if sources.iter().any(|s| s == url) {
            return Ok(false);
        }
        sources.push(url.to_string());
        self.write(&sources)?;
        Ok(true)
    }

    /// Remove a source URL. Returns false when it was not present.
    pub fn remove(&self, url: &str) -> Result<bool> {
        let sources = self.read()?;
        let before = sources.len();
        let kept: Vec<String> = sources.into_iter().filter(|s| s != url).collect();
        if kept.len() == before {
            return Ok(false);
        }
        self.write(&kept)?;
        Ok(true)
    }

    fn write(&self, sources: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let mut content = sources.join("\n");
        content.push('\n');
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write sources file {}", self.path.display()))
    }
}
