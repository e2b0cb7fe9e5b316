//! Schema migration tracking and execution.
//!
//! This module handles:
//! - The `schema_migrations` ledger recording applied versions per plugin
//! - Discovering numbered migration files and loading their up/down scripts
//! - Applying and reverting migrations sequentially toward a target version

mod error;
mod ledger;
pub mod memory;
mod runner;
mod script;
mod store;

pub use error::MigrationError;
pub use ledger::{LEDGER_TABLE, LEGACY_TABLE, Ledger};
pub use runner::{Direction, MigrationUnit, Migrator, discover};
pub use script::MigrationScript;
pub use store::{ColumnKind, ColumnSpec, MigrationStore, PgStore, StoreError};
