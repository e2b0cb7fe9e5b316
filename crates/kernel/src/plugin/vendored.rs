//! Vendored plugin discovery.
//!
//! Installed plugins live one directory each under `vendor/plugins`. A
//! plugin may carry an optional `plugin.toml` with metadata; its
//! migrations, when it has any, live in `<dir>/db/migrate`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

/// Optional plugin metadata parsed from `plugin.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginAbout {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Plugin version string.
    #[serde(default)]
    pub version: String,

    /// Plugin author.
    #[serde(default)]
    pub author: String,
}

/// One plugin vendored on disk.
#[derive(Debug, Clone)]
pub struct VendoredPlugin {
    /// Directory name; doubles as the plugin's ledger namespace.
    pub name: String,
    pub dir: PathBuf,
    /// Metadata from `plugin.toml`, when the file exists and parses.
    pub about: Option<PluginAbout>,
}

impl VendoredPlugin {
    /// Where this plugin keeps its migrations.
    pub fn migrations_dir(&self) -> PathBuf {
        self.dir.join("db").join("migrate")
    }

    /// Whether the plugin ships any migration files.
    pub fn has_migrations(&self) -> bool {
        let dir = self.migrations_dir();
        fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_some())
    }
}

/// Scan the vendor directory for installed plugins, sorted by name.
/// Unreadable entries are skipped with a warning rather than failing the
/// whole scan.
pub fn discover_vendored(vendor_dir: &Path) -> Vec<VendoredPlugin> {
    let mut plugins = Vec::new();

    if !vendor_dir.exists() {
        debug!(dir = %vendor_dir.display(), "vendor directory does not exist, nothing installed");
        return plugins;
    }

    let entries = match fs::read_dir(vendor_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %vendor_dir.display(), error = %e, "failed to read vendor directory");
            return plugins;
        }
    };

    let mut dirs: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    dirs.sort_by_key(|e| e.file_name());

    for entry in dirs {
        let dir = entry.path();
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(String::from) else {
            warn!(dir = %dir.display(), "skipping plugin directory with non-UTF-8 name");
            continue;
        };

        let about = load_about(&dir);
        plugins.push(VendoredPlugin { name, dir, about });
    }

    plugins
}

/// Find one vendored plugin by name.
pub fn find_vendored(vendor_dir: &Path, name: &str) -> Option<VendoredPlugin> {
    discover_vendored(vendor_dir)
        .into_iter()
        .find(|p| p.name == name)
}

fn load_about(dir: &Path) -> Option<PluginAbout> {
    let path = dir.join("plugin.toml");
    let content = fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(about) => Some(about),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unparseable plugin.toml");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn discovery_returns_sorted_plugin_directories() {
        let vendor = tempfile::tempdir().unwrap();
        fs::create_dir(vendor.path().join("zebra")).unwrap();
        fs::create_dir(vendor.path().join("alpha")).unwrap();
        fs::write(vendor.path().join("stray_file"), "not a plugin").unwrap();

        let plugins = discover_vendored(vendor.path());
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zebra"]);
    }

    #[test]
    fn missing_vendor_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_vendored(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn about_metadata_is_optional() {
        let vendor = tempfile::tempdir().unwrap();
        let blog = vendor.path().join("blog");
        fs::create_dir(&blog).unwrap();
        fs::write(
            blog.join("plugin.toml"),
            "description = \"A blog\"\nversion = \"1.2.0\"\n",
        )
        .unwrap();
        fs::create_dir(vendor.path().join("bare")).unwrap();

        let plugins = discover_vendored(vendor.path());
        assert!(plugins[1].about.is_none());
        let about = plugins[0].about.as_ref().unwrap();
        assert_eq!(about.version, "1.2.0");
    }

    #[test]
    fn broken_about_metadata_is_ignored() {
        let vendor = tempfile::tempdir().unwrap();
        let blog = vendor.path().join("blog");
        fs::create_dir(&blog).unwrap();
        fs::write(blog.join("plugin.toml"), "version = [not toml").unwrap();

        let plugins = discover_vendored(vendor.path());
        assert_eq!(plugins.len(), 1);
        assert!(plugins[0].about.is_none());
    }

    #[test]
    fn has_migrations_checks_the_migrate_directory() {
        let vendor = tempfile::tempdir().unwrap();
        let blog = vendor.path().join("blog");
        fs::create_dir_all(blog.join("db").join("migrate")).unwrap();
        fs::write(
            blog.join("db").join("migrate").join("1_create_posts.sql"),
            "-- up\nCREATE TABLE posts (id INTEGER);\n",
        )
        .unwrap();

        let plugin = find_vendored(vendor.path(), "blog").unwrap();
        assert!(plugin.has_migrations());

        fs::create_dir(vendor.path().join("empty")).unwrap();
        let empty = find_vendored(vendor.path(), "empty").unwrap();
        assert!(!empty.has_migrations());
    }
}
