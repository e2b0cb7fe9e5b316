//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL. Only required by commands that touch
    /// the migrations ledger (migrate, rollback, rename).
    pub database_url: Option<String>,

    /// Application root directory (default: current directory).
    pub root: PathBuf,

    /// Maximum database connections in pool (default: 5).
    pub database_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").ok();

        let root = env::var("BINARIO_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        Ok(Self {
            database_url,
            root,
            database_max_connections,
        })
    }

    /// Directory holding vendored plugins: `<root>/vendor/plugins`.
    pub fn vendor_dir(&self) -> PathBuf {
        self.root.join("vendor").join("plugins")
    }

    /// The application's own migration directory: `<root>/db/migrate`.
    pub fn app_migrations_dir(&self) -> PathBuf {
        self.root.join("db").join("migrate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_hang_off_the_root() {
        let config = Config {
            database_url: None,
            root: PathBuf::from("/srv/app"),
            database_max_connections: 5,
        };
        assert_eq!(config.vendor_dir(), PathBuf::from("/srv/app/vendor/plugins"));
        assert_eq!(
            config.app_migrations_dir(),
            PathBuf::from("/srv/app/db/migrate")
        );
    }
}
