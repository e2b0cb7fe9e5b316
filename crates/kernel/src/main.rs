//! Binario plugin manager.
//!
//! CLI for managing vendored plugins and their schema migrations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use binario_kernel::config::Config;
use binario_kernel::db;
use binario_kernel::migration::{MigrationStore, PgStore};
use binario_kernel::plugin::cli;
use binario_kernel::plugin::SourceRegistry;

#[derive(Parser)]
#[command(name = "binario", version, about = "Binario plugin manager.")]
struct Cli {
    /// Set an explicit application root directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Use these plugin repositories instead of the configured sources.
    #[arg(long, global = true, value_delimiter = ',')]
    source: Vec<String>,

    /// Turn on verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available plugins.
    List {
        /// List locally installed plugins instead of remote ones.
        #[arg(long)]
        local: bool,
    },

    /// Discover plugin repositories on a registry page.
    Discover {
        /// Registry page to scan.
        url: String,

        /// Just list what was found, don't prompt to add anything.
        #[arg(short, long)]
        list: bool,
    },

    /// Install plugin(s) from known repositories or URLs.
    Install {
        /// Plugin names, git URLs, or repository directory URLs.
        names: Vec<String>,
    },

    /// Update installed plugins.
    Update {
        /// Plugins to update; all of them when omitted.
        names: Vec<String>,
    },

    /// Uninstall plugins.
    Remove { names: Vec<String> },

    /// Add plugin source repositories.
    Source { urls: Vec<String> },

    /// Remove plugin source repositories.
    Unsource { urls: Vec<String> },

    /// List currently configured plugin repositories.
    Sources,

    /// Rename a plugin on disk and in the migrations ledger.
    Rename {
        old_name: String,
        new_name: String,
    },

    /// Run pending migrations for the application or a plugin.
    Migrate {
        /// Plugin to migrate; the application itself when omitted.
        #[arg(long)]
        plugin: Option<String>,

        /// Target version; the latest available when omitted.
        #[arg(long)]
        version: Option<i64>,
    },

    /// Roll back the most recently applied migrations.
    Rollback {
        /// Plugin to roll back; the application itself when omitted.
        #[arg(long)]
        plugin: Option<String>,

        /// How many migrations to revert.
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(root) = args.root {
        config.root = root;
    }

    let registry = SourceRegistry::new(&config.root);
    let sources = if args.source.is_empty() {
        registry.read()?
    } else {
        args.source.clone()
    };

    let vendor_dir = config.vendor_dir();
    let app_migrations = config.app_migrations_dir();

    match args.command {
        Command::List { local } => cli::cmd_list(&sources, &vendor_dir, local).await,
        Command::Discover { url, list } => cli::cmd_discover(&url, list, &registry).await,
        Command::Install { names } => cli::cmd_install(&sources, &vendor_dir, &names).await,
        Command::Update { names } => cli::cmd_update(&sources, &vendor_dir, &names).await,
        Command::Remove { names } => cli::cmd_remove(&vendor_dir, &names),
        Command::Source { urls } => cli::cmd_source(&registry, &urls),
        Command::Unsource { urls } => cli::cmd_unsource(&registry, &urls),
        Command::Sources => cli::cmd_sources(&registry),
        Command::Rename { old_name, new_name } => {
            let store = connect(&config).await?;
            cli::cmd_rename(store, &vendor_dir, &old_name, &new_name).await
        }
        Command::Migrate { plugin, version } => {
            let store = connect(&config).await?;
            cli::cmd_migrate(
                store,
                &vendor_dir,
                &app_migrations,
                plugin.as_deref(),
                version,
            )
            .await
        }
        Command::Rollback { plugin, steps } => {
            let store = connect(&config).await?;
            cli::cmd_rollback(store, &vendor_dir, &app_migrations, plugin.as_deref(), steps).await
        }
    }
}

/// Build the migration store for ledger-facing commands.
async fn connect(config: &Config) -> Result<Arc<dyn MigrationStore>> {
    let pool = db::create_pool(config).await?;
    if !db::check_health(&pool).await {
        warn!("database connection is unhealthy");
    }
    Ok(Arc::new(PgStore::new(pool)))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug,sqlx=info"
    } else {
        "info,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
