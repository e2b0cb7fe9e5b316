//! CLI command implementations for plugin management.
//!
//! These commands operate with a minimal context (paths, the configured
//! sources, and a migration store for the ledger-facing ones), without
//! loading the rest of the framework.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use super::repository;
use super::sources::SourceRegistry;
use super::vendored::{self, VendoredPlugin};
use crate::migration::{Ledger, MigrationStore, Migrator, discover};

/// List plugins: the vendored ones with `local`, otherwise everything the
/// configured sources offer.
pub async fn cmd_list(sources: &[String], vendor_dir: &Path, local: bool) -> Result<()> {
    if local {
        let plugins = vendored::discover_vendored(vendor_dir);
        if plugins.is_empty() {
            println!("No plugins installed.");
            return Ok(());
        }

        println!("{:<24} {:<10} {:<11} DESCRIPTION", "PLUGIN", "VERSION", "MIGRATIONS");
        println!("{}", "-".repeat(72));
        for plugin in &plugins {
            let (version, description) = match &plugin.about {
                Some(about) => (about.version.as_str(), about.description.as_str()),
                None => ("?", ""),
            };
            let migrations = match discover(&plugin.migrations_dir(), Some(&plugin.name)) {
                Ok(units) => units.len().to_string(),
                Err(_) => "?".to_string(),
            };
            println!(
                "{:<24} {:<10} {:<11} {}",
                plugin.name, version, migrations, description
            );
        }
        return Ok(());
    }

    for source in sources {
        println!("{source}");
        match repository::Repository::new(source).plugins().await {
            Ok(names) if names.is_empty() => println!("  (no plugins)"),
            Ok(names) => {
                for name in names {
                    println!("  {name}");
                }
            }
            Err(e) => println!("  unreachable: {e}"),
        }
    }
    Ok(())
}

/// Discover plugin repositories on a registry page and offer to add them.
pub async fn cmd_discover(url: &str, list_only: bool, registry: &SourceRegistry) -> Result<()> {
    let repositories = repository::discover_repositories(url)
        .await
        .with_context(|| format!("failed to scan {url}"))?;

    if repositories.is_empty() {
        println!("No plugin repositories found at {url}.");
        return Ok(());
    }

    if list_only {
        for repo in &repositories {
            println!("{repo}");
        }
        return Ok(());
    }

    let known = registry.read()?;
    let stdin = std::io::stdin();
    for repo in &repositories {
        if known.iter().any(|s| s == repo) {
            continue;
        }
        print!("Add {repo}? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        stdin.read_line(&mut answer)?;
        if answer.trim().eq_ignore_ascii_case("y") {
            registry.add(repo)?;
            println!("Added {repo}");
        }
    }
    Ok(())
}

/// Install plugins by name or URL.
pub async fn cmd_install(sources: &[String], vendor_dir: &Path, names: &[String]) -> Result<()> {
    if names.is_empty() {
        bail!("nothing to install. Usage: binario install PLUGIN_OR_URL...");
    }

    for name in names {
        let dir = repository::install(sources, name, vendor_dir).await?;
        println!("Installed '{}' into {}.", name, dir.display());
        if let Some(plugin) = vendored_by_dir(vendor_dir, &dir) {
            if plugin.has_migrations() {
                println!(
                    "  '{}' ships migrations. Apply them with: binario migrate --plugin {}",
                    plugin.name, plugin.name
                );
            }
        }
    }
    Ok(())
}

/// Update installed plugins; all of them when no names are given.
pub async fn cmd_update(sources: &[String], vendor_dir: &Path, names: &[String]) -> Result<()> {
    let targets: Vec<String> = if names.is_empty() {
        vendored::discover_vendored(vendor_dir)
            .into_iter()
            .map(|p| p.name)
            .collect()
    } else {
        names.to_vec()
    };

    if targets.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    for name in &targets {
        repository::update(sources, name, vendor_dir).await?;
        println!("Updated '{name}'.");
    }
    Ok(())
}

/// Remove vendored plugins. The ledger keeps their migration history; a
/// reinstall picks up where it left off.
pub fn cmd_remove(vendor_dir: &Path, names: &[String]) -> Result<()> {
    if names.is_empty() {
        bail!("nothing to remove. Usage: binario remove PLUGIN...");
    }
    for name in names {
        repository::remove(vendor_dir, name)?;
        println!("Removed '{name}'.");
    }
    Ok(())
}

/// Add source repositories.
pub fn cmd_source(registry: &SourceRegistry, urls: &[String]) -> Result<()> {
    for url in urls {
        if registry.add(url)? {
            println!("Added {url}");
        } else {
            println!("Already configured: {url}");
        }
    }
    Ok(())
}

/// Remove source repositories.
pub fn cmd_unsource(registry: &SourceRegistry, urls: &[String]) -> Result<()> {
    for url in urls {
        if registry.remove(url)? {
            println!("Removed {url}");
        } else {
            println!("Not a configured source: {url}");
        }
    }
    Ok(())
}

/// Print the configured source repositories.
pub fn cmd_sources(registry: &SourceRegistry) -> Result<()> {
    for source in registry.read()? {
        println!("{source}");
    }
    Ok(())
}

/// Rename a plugin on disk and across its ledger records. When the ledger
/// update fails, the directory move is undone so the two stay consistent.
pub async fn cmd_rename(
    store: Arc<dyn MigrationStore>,
    vendor_dir: &Path,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    let old_dir = vendor_dir.join(old_name);
    let new_dir = vendor_dir.join(new_name);

    if new_dir.exists() {
        bail!(
            "cannot rename: {} already exists",
            new_dir.display()
        );
    }

    let moved = if old_dir.exists() {
        fs::rename(&old_dir, &new_dir).with_context(|| {
            format!("failed to move {} to {}", old_dir.display(), new_dir.display())
        })?;
        true
    } else {
        println!(
            "Note: {} does not exist; renaming ledger records only.",
            old_dir.display()
        );
        false
    };

    let ledger = Ledger::new(store);
    let changed = match ledger.rename_namespace(old_name, new_name).await {
        Ok(changed) => changed,
        Err(e) => {
            if moved {
                // Put the directory back so disk and ledger stay in step.
                let _ = fs::rename(&new_dir, &old_dir);
            }
            return Err(e).context("failed to rename plugin in the migrations ledger");
        }
    };

    println!("Renamed '{old_name}' to '{new_name}' ({changed} ledger records updated).");
    Ok(())
}

/// Run migrations for the application or one plugin, optionally toward an
/// explicit target version.
pub async fn cmd_migrate(
    store: Arc<dyn MigrationStore>,
    vendor_dir: &Path,
    app_migrations: &Path,
    plugin: Option<&str>,
    version: Option<i64>,
) -> Result<()> {
    let path = migrations_path(vendor_dir, app_migrations, plugin)?;

    Migrator::migrate(store.clone(), &path, version, plugin).await?;

    let current = Ledger::new(store).current_version(plugin).await?;
    match plugin {
        Some(name) => println!("Plugin '{name}' is now at version {current}."),
        None => println!("Application schema is now at version {current}."),
    }
    Ok(())
}

/// Roll back the most recent migrations for the application or one plugin.
pub async fn cmd_rollback(
    store: Arc<dyn MigrationStore>,
    vendor_dir: &Path,
    app_migrations: &Path,
    plugin: Option<&str>,
    steps: usize,
) -> Result<()> {
    let path = migrations_path(vendor_dir, app_migrations, plugin)?;

    Migrator::rollback(store.clone(), &path, steps, plugin).await?;

    let current = Ledger::new(store).current_version(plugin).await?;
    match plugin {
        Some(name) => println!("Plugin '{name}' is now at version {current}."),
        None => println!("Application schema is now at version {current}."),
    }
    Ok(())
}

fn migrations_path(
    vendor_dir: &Path,
    app_migrations: &Path,
    plugin: Option<&str>,
) -> Result<std::path::PathBuf> {
    match plugin {
        Some(name) => {
            let Some(plugin) = vendored::find_vendored(vendor_dir, name) else {
                bail!(
                    "plugin '{name}' is not installed. Install it first with: binario install {name}"
                );
            };
            Ok(plugin.migrations_dir())
        }
        None => Ok(app_migrations.to_path_buf()),
    }
}

fn vendored_by_dir(vendor_dir: &Path, dir: &Path) -> Option<VendoredPlugin> {
    let name = dir.file_name()?.to_str()?;
    vendored::find_vendored(vendor_dir, name)
}
