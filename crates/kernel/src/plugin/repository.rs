//! Remote plugin repositories.
//!
//! A source repository is a plain HTTP directory listing: one
//! subdirectory per plugin. Listing scrapes anchor hrefs out of the index
//! page; installing exports a plugin directory file by file. Git URLs are
//! handed to the `git` binary instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::error::PluginError;

/// Anchor hrefs in a directory index page. Query strings and fragments
/// disqualify a link; those are never plain files or subdirectories.
static HREF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // The pattern is a literal and cannot fail to compile.
    #[allow(clippy::expect_used)]
    Regex::new(r#"href=["']([^"'#?]+)["']"#).expect("valid href pattern")
});

/// Whether an install argument is a git repository URL.
pub fn is_git_url(argument: &str) -> bool {
    argument.starts_with("git://") || argument.ends_with(".git")
}

/// Derive a plugin name from a repository URL: the last path segment,
/// with any `.git` suffix dropped.
pub fn plugin_name_from_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    let name = segment.strip_suffix(".git").unwrap_or(segment);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Relative links only: index pages decorate listings with sort links,
/// parent links, and absolute URLs that all have to be ignored.
fn is_listing_entry(link: &str) -> bool {
    !(link.is_empty()
        || link.starts_with('/')
        || link.starts_with("..")
        || link.starts_with('.')
        || link.contains("://"))
}

/// One HTTP plugin repository.
pub struct Repository {
    url: String,
    client: reqwest::Client,
}

impl Repository {
    pub fn new(url: &str) -> Self {
        let mut url = url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Plugin names available in this repository: the subdirectory links
    /// of its index page.
    pub async fn plugins(&self) -> Result<Vec<String>, PluginError> {
        let links = self.links(&self.url).await?;
        Ok(links
            .iter()
            .filter(|link| link.ends_with('/'))
            .map(|link| link.trim_end_matches('/').to_string())
            .collect())
    }

    /// Whether this repository hosts `name`.
    pub async fn hosts(&self, name: &str) -> Result<bool, PluginError> {
        let wanted = format!("{name}/");
        Ok(self.links(&self.url).await?.iter().any(|l| *l == wanted))
    }

    /// Export the plugin directory `name` into `dest`, recursively.
    pub async fn export(&self, name: &str, dest: &Path) -> Result<(), PluginError> {
        let root = join_url(&self.url, &format!("{name}/"))?;
        let mut worklist: Vec<(String, PathBuf)> = vec![(root, dest.to_path_buf())];

        while let Some((url, dir)) = worklist.pop() {
            fs::create_dir_all(&dir).map_err(|e| PluginError::io(&dir, &e))?;

            for link in self.links(&url).await? {
                if !is_listing_entry(&link) {
                    continue;
                }
                if let Some(subdir) = link.strip_suffix('/') {
                    worklist.push((join_url(&url, &link)?, dir.join(subdir)));
                } else {
                    let file_url = join_url(&url, &link)?;
                    let path = dir.join(&link);
                    debug!(url = %file_url, "downloading plugin file");
                    let bytes = self
                        .client
                        .get(&file_url)
                        .send()
                        .await
                        .and_then(reqwest::Response::error_for_status)
                        .map_err(|e| PluginError::Fetch {
                            url: file_url.clone(),
                            details: e.to_string(),
                        })?
                        .bytes()
                        .await
                        .map_err(|e| PluginError::Fetch {
                            url: file_url.clone(),
                            details: e.to_string(),
                        })?;
                    fs::write(&path, &bytes).map_err(|e| PluginError::io(&path, &e))?;
                }
            }
        }

        Ok(())
    }

    async fn links(&self, url: &str) -> Result<Vec<String>, PluginError> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PluginError::Fetch {
                url: url.to_string(),
                details: e.to_string(),
            })?
            .text()
            .await
            .map_err(|e| PluginError::Fetch {
                url: url.to_string(),
                details: e.to_string(),
            })?;

        Ok(scrape_links(&body))
    }
}

fn scrape_links(body: &str) -> Vec<String> {
    HREF_PATTERN
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .filter(|link| is_listing_entry(link))
        .collect()
}

fn join_url(base: &str, link: &str) -> Result<String, PluginError> {
    let base = Url::parse(base).map_err(|e| PluginError::InvalidUrl {
        url: base.to_string(),
        details: e.to_string(),
    })?;
    let joined = base.join(link).map_err(|e| PluginError::InvalidUrl {
        url: link.to_string(),
        details: e.to_string(),
    })?;
    Ok(joined.to_string())
}

/// Scrape candidate repository URLs out of a registry page: absolute
/// links whose path ends with `plugins/`.
pub async fn discover_repositories(url: &str) -> Result<Vec<String>, PluginError> {
    let body = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| PluginError::Fetch {
            url: url.to_string(),
            details: e.to_string(),
        })?
        .text()
        .await
        .map_err(|e| PluginError::Fetch {
            url: url.to_string(),
            details: e.to_string(),
        })?;

    let mut repositories: Vec<String> = HREF_PATTERN
        .captures_iter(&body)
        .map(|caps| caps[1].to_string())
        .filter(|link| link.contains("://") && link.ends_with("plugins/"))
        .collect();
    repositories.sort();
    repositories.dedup();
    Ok(repositories)
}

/// Install a plugin into `vendor_dir` from a name or URL, returning the
/// installed directory. Names are resolved against `sources` in order.
pub async fn install(
    sources: &[String],
    name_or_url: &str,
    vendor_dir: &Path,
) -> Result<PathBuf, PluginError> {
    let name = if name_or_url.contains("://") || is_git_url(name_or_url) {
        plugin_name_from_url(name_or_url).ok_or_else(|| PluginError::InvalidUrl {
            url: name_or_url.to_string(),
            details: "no plugin name in URL path".to_string(),
        })?
    } else {
        name_or_url.to_string()
    };

    let dest = vendor_dir.join(&name);
    if dest.exists() {
        return Err(PluginError::AlreadyInstalled {
            plugin: name,
            path: dest.display().to_string(),
        });
    }

    if is_git_url(name_or_url) {
        git_clone(name_or_url, &name, &dest).await?;
        info!(plugin = %name, "installed from git");
        return Ok(dest);
    }

    if name_or_url.contains("://") {
        // A direct repository URL: export the directory it points at.
        let (base, _) = split_parent(name_or_url)?;
        Repository::new(&base).export(&name, &dest).await?;
        info!(plugin = %name, url = name_or_url, "installed from repository URL");
        return Ok(dest);
    }

    for source in sources {
        let repository = Repository::new(source);
        match repository.hosts(&name).await {
            Ok(true) => {
                repository.export(&name, &dest).await?;
                info!(plugin = %name, source = %source, "installed from source");
                return Ok(dest);
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(source = %source, error = %e, "skipping unreachable source");
                continue;
            }
        }
    }

    Err(PluginError::NotFound {
        plugin: name,
        sources: sources.join(", "),
    })
}

/// Update an installed plugin: `git pull` for git checkouts, re-export
/// from the first hosting source otherwise.
pub async fn update(
    sources: &[String],
    name: &str,
    vendor_dir: &Path,
) -> Result<(), PluginError> {
    let dir = vendor_dir.join(name);
    if !dir.exists() {
        return Err(PluginError::NotInstalled {
            plugin: name.to_string(),
        });
    }

    if dir.join(".git").exists() {
        git_pull(name, &dir).await?;
        info!(plugin = name, "updated via git");
        return Ok(());
    }

    for source in sources {
        let repository = Repository::new(source);
        match repository.hosts(name).await {
            Ok(true) => {
                repository.export(name, &dir).await?;
                info!(plugin = name, source = %source, "re-exported from source");
                return Ok(());
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(source = %source, error = %e, "skipping unreachable source");
                continue;
            }
        }
    }

    Err(PluginError::NotFound {
        plugin: name.to_string(),
        sources: sources.join(", "),
    })
}

/// Delete a vendored plugin directory.
pub fn remove(vendor_dir: &Path, name: &str) -> Result<(), PluginError> {
    let dir = vendor_dir.join(name);
    if !dir.exists() {
        return Err(PluginError::NotInstalled {
            plugin: name.to_string(),
        });
    }
    fs::remove_dir_all(&dir).map_err(|e| PluginError::io(&dir, &e))?;
    info!(plugin = name, "removed");
    Ok(())
}

/// Split a plugin directory URL into its repository base and plugin name.
fn split_parent(raw: &str) -> Result<(String, String), PluginError> {
    let name = plugin_name_from_url(raw).ok_or_else(|| PluginError::InvalidUrl {
        url: raw.to_string(),
        details: "no plugin name in URL path".to_string(),
    })?;
    let trimmed = raw.trim_end_matches('/');
    let base = trimmed
        .strip_suffix(name.as_str())
        .map(str::to_string)
        .ok_or_else(|| PluginError::InvalidUrl {
            url: raw.to_string(),
            details: "URL does not end with the plugin name".to_string(),
        })?;
    Ok((base, name))
}

async fn git_clone(url: &str, name: &str, dest: &Path) -> Result<(), PluginError> {
    let output = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg(url)
        .arg(dest)
        .output()
        .await
        .map_err(|e| PluginError::Git {
            operation: "clone".to_string(),
            plugin: name.to_string(),
            details: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(PluginError::Git {
            operation: "clone".to_string(),
            plugin: name.to_string(),
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn git_pull(name: &str, dir: &Path) -> Result<(), PluginError> {
    let output = tokio::process::Command::new("git")
        .arg("pull")
        .arg("--ff-only")
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| PluginError::Git {
            operation: "pull".to_string(),
            plugin: name.to_string(),
            details: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(PluginError::Git {
            operation: "pull".to_string(),
            plugin: name.to_string(),
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn git_urls_are_recognized() {
        assert!(is_git_url("git://github.com/someone/my_plugin.git"));
        assert!(is_git_url("https://github.com/someone/my_plugin.git"));
        assert!(!is_git_url("https://plugins.example.com/my_plugin/"));
        assert!(!is_git_url("my_plugin"));
    }

    #[test]
    fn plugin_names_come_from_the_last_path_segment() {
        assert_eq!(
            plugin_name_from_url("git://github.com/someone/my_plugin.git").as_deref(),
            Some("my_plugin")
        );
        assert_eq!(
            plugin_name_from_url("https://plugins.example.com/continuous_builder/").as_deref(),
            Some("continuous_builder")
        );
        assert_eq!(plugin_name_from_url("https://example.com///"), None);
    }

    #[test]
    fn scraping_keeps_listing_entries_only() {
        let body = r#"
            <a href="../">Parent</a>
            <a href="continuous_builder/">continuous_builder/</a>
            <a href="?C=N;O=D">Name</a>
            <a href="/absolute/path/">abs</a>
            <a href="https://elsewhere.example.com/">offsite</a>
            <a href="README">README</a>
        "#;
        assert_eq!(scrape_links(body), vec!["continuous_builder/", "README"]);
    }

    #[test]
    fn direct_urls_split_into_base_and_name() {
        let (base, name) =
            split_parent("https://plugins.example.com/stable/continuous_builder/").unwrap();
        assert_eq!(base, "https://plugins.example.com/stable/");
        assert_eq!(name, "continuous_builder");
    }
}
