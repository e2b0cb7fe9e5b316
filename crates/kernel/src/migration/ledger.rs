//! The schema migrations ledger.
//!
//! One row per applied (version, plugin) pair in `schema_migrations`.
//! A NULL plugin column marks the application's own namespace. The table
//! is created lazily on first use, importing the legacy single-row
//! `schema_info` marker when one is found.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::{MigrationError, namespace_label};
use super::store::{ColumnKind, ColumnSpec, MigrationStore, StoreError};

/// Table recording applied migration versions.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Pre-ledger marker table: a single row holding the highest applied
/// version, with no namespace column.
pub const LEGACY_TABLE: &str = "schema_info";

const UNIQUE_INDEX: &str = "unique_schema_migrations";

/// Durable record of applied migration versions, partitioned by namespace.
pub struct Ledger {
    store: Arc<dyn MigrationStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    /// Create the ledger table if it does not exist yet. Idempotent; a
    /// no-op when the table is already present. On first creation, any
    /// legacy `schema_info` marker is imported and dropped.
    pub async fn ensure_ledger(&self) -> Result<(), MigrationError> {
        if !self.store.supports_migrations() {
            return Err(MigrationError::UnsupportedStore);
        }

        if self.store.table_exists(LEDGER_TABLE).await? {
            return Ok(());
        }

        info!(table = LEDGER_TABLE, "creating schema migrations ledger");
        self.store
            .create_table(
                LEDGER_TABLE,
                &[
                    ColumnSpec {
                        name: "version",
                        kind: ColumnKind::Varchar,
                        nullable: false,
                    },
                    ColumnSpec {
                        name: "plugin",
                        kind: ColumnKind::Varchar,
                        nullable: true,
                    },
                ],
            )
            .await?;
        self.store
            .add_unique_index(LEDGER_TABLE, &["version", "plugin"], UNIQUE_INDEX)
            .await?;

        self.import_legacy_schema_info().await?;
        Ok(())
    }

    /// One-time import of the legacy `schema_info` marker: synthesize a
    /// ledger record for every version up to the stored value in the
    /// application namespace, then drop the marker table.
    ///
    /// Returns the imported version, or `None` when no marker table exists.
    pub async fn import_legacy_schema_info(&self) -> Result<Option<i64>, MigrationError> {
        if !self.store.table_exists(LEGACY_TABLE).await? {
            return Ok(None);
        }

        let old_version: i64 = self
            .store
            .select_value(LEGACY_TABLE, "version", &[])
            .await?
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0);

        info!(
            version = old_version,
            "importing legacy schema_info marker into the ledger"
        );

        for version in 1..=old_version {
            let version = version.to_string();
            self.store
                .insert(
                    LEDGER_TABLE,
                    &[("version", Some(version.as_str())), ("plugin", None)],
                )
                .await?;
        }

        self.store.drop_table(LEGACY_TABLE).await?;
        Ok(Some(old_version))
    }

    /// Every version recorded for `namespace`. Empty when the ledger table
    /// does not exist yet.
    pub async fn applied_versions(
        &self,
        namespace: Option<&str>,
    ) -> Result<BTreeSet<i64>, MigrationError> {
        if !self.store.table_exists(LEDGER_TABLE).await? {
            return Ok(BTreeSet::new());
        }

        let values = self
            .store
            .select_values(LEDGER_TABLE, "version", &[("plugin", namespace)])
            .await?;

        Ok(values.iter().filter_map(|v| v.parse().ok()).collect())
    }

    /// Highest recorded version for `namespace`, or 0 when nothing has
    /// been applied (including when the ledger table does not exist).
    pub async fn current_version(&self, namespace: Option<&str>) -> Result<i64, MigrationError> {
        Ok(self
            .applied_versions(namespace)
            .await?
            .last()
            .copied()
            .unwrap_or(0))
    }

    /// Record `version` as applied for `namespace`.
    pub async fn record_applied(
        &self,
        version: i64,
        namespace: Option<&str>,
    ) -> Result<(), MigrationError> {
        let value = version.to_string();
        match self
            .store
            .insert(
                LEDGER_TABLE,
                &[("version", Some(value.as_str())), ("plugin", namespace)],
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::UniqueViolation { .. }) => Err(MigrationError::DuplicateRecord {
                version,
                namespace: namespace_label(namespace),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the record for `version` in `namespace`. Not an error when
    /// no such record exists.
    pub async fn record_reverted(
        &self,
        version: i64,
        namespace: Option<&str>,
    ) -> Result<(), MigrationError> {
        let value = version.to_string();
        let removed = self
            .store
            .delete(
                LEDGER_TABLE,
                &[("version", Some(value.as_str())), ("plugin", namespace)],
            )
            .await?;
        debug!(version, removed, "reverted ledger record");
        Ok(())
    }

    /// Rename a plugin namespace across all its ledger records, returning
    /// how many rows changed.
    pub async fn rename_namespace(&self, old: &str, new: &str) -> Result<u64, MigrationError> {
        if !self.store.table_exists(LEDGER_TABLE).await? {
            return Ok(0);
        }

        let changed = self
            .store
            .update(
                LEDGER_TABLE,
                &[("plugin", Some(new))],
                &[("plugin", Some(old))],
            )
            .await?;
        info!(old, new, changed, "renamed plugin namespace in the ledger");
        Ok(changed)
    }
}
