//! In-process [`MigrationStore`] used by tests.
//!
//! Holds tables as plain row maps, enforces unique indexes on insert, and
//! journals every executed migration script so tests can assert on exactly
//! what ran and in what order.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::store::{ColumnSpec, MigrationStore, StoreError};

type Row = HashMap<String, Option<String>>;

#[derive(Default)]
struct Table {
    columns: Vec<String>,
    unique_indexes: Vec<(String, Vec<String>)>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Table>,
    script_journal: Vec<String>,
    fail_scripts_containing: Option<String>,
}

/// A [`MigrationStore`] backed by process memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    supports_migrations: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            supports_migrations: true,
        }
    }

    /// A store that reports no migration support, for testing the
    /// unsupported-store path.
    pub fn unsupported() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            supports_migrations: false,
        }
    }

    /// Every script executed so far, in execution order.
    pub fn executed_scripts(&self) -> Vec<String> {
        self.lock().script_journal.clone()
    }

    /// Make `execute_script` fail for any script containing `pattern`,
    /// simulating a migration whose own statements blow up.
    pub fn fail_scripts_containing(&self, pattern: &str) {
        self.lock().fail_scripts_containing = Some(pattern.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owned_row(values: &[(&str, Option<&str>)]) -> Row {
    values
        .iter()
        .map(|(c, v)| ((*c).to_string(), v.map(str::to_string)))
        .collect()
}

fn matches(row: &Row, filters: &[(&str, Option<&str>)]) -> bool {
    filters.iter().all(|(column, value)| {
        row.get(*column).is_some_and(|cell| {
            cell.as_deref() == *value
        })
    })
}

#[async_trait]
impl MigrationStore for MemoryStore {
    fn supports_migrations(&self) -> bool {
        self.supports_migrations
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn create_table(&self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.tables.contains_key(table) {
            return Err(StoreError::Backend(format!("table {table} already exists")));
        }
        inner.tables.insert(
            table.to_string(),
            Table {
                columns: columns.iter().map(|c| c.name.to_string()).collect(),
                unique_indexes: Vec::new(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn add_unique_index(
        &self,
        table: &str,
        columns: &[&str],
        index: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let table = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {table}")))?;
        table.unique_indexes.push((
            index.to_string(),
            columns.iter().map(|c| (*c).to_string()).collect(),
        ));
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend(format!("no such table: {table}")))
    }

    async fn select_values(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        let table = inner
            .tables
            .get(table)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {table}")))?;

        Ok(table
            .rows
            .iter()
            .filter(|row| matches(row, filters))
            .filter_map(|row| row.get(column).cloned().flatten())
            .collect())
    }

    async fn select_value(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .select_values(table, column, filters)
            .await?
            .into_iter()
            .next())
    }

    async fn insert(
        &self,
        table: &str,
        values: &[(&str, Option<&str>)],
    ) -> Result<(), StoreError> {
        let table_name = table;
        let mut inner = self.lock();
        let table = inner
            .tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {table_name}")))?;

        let row = owned_row(values);
        for (index, columns) in &table.unique_indexes {
            let collides = table.rows.iter().any(|existing| {
                columns.iter().all(|c| {
                    existing.get(c).cloned().flatten() == row.get(c).cloned().flatten()
                })
            });
            if collides {
                return Err(StoreError::UniqueViolation {
                    table: table_name.to_string(),
                    index: index.clone(),
                });
            }
        }

        table.rows.push(row);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        assignments: &[(&str, Option<&str>)],
        filters: &[(&str, Option<&str>)],
    ) -> Result<u64, StoreError> {
        let table_name = table;
        let mut inner = self.lock();
        let table = inner
            .tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {table_name}")))?;

        let mut changed = 0;
        for row in table.rows.iter_mut().filter(|row| matches(row, filters)) {
            for (column, value) in assignments {
                row.insert((*column).to_string(), value.map(str::to_string));
            }
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(
        &self,
        table: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<u64, StoreError> {
        let table_name = table;
        let mut inner = self.lock();
        let table = inner
            .tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::Backend(format!("no such table: {table_name}")))?;

        let before = table.rows.len();
        table.rows.retain(|row| !matches(row, filters));
        Ok((before - table.rows.len()) as u64)
    }

    async fn execute_script(&self, sql: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(pattern) = &inner.fail_scripts_containing {
            if sql.contains(pattern.as_str()) {
                return Err(StoreError::Backend(format!(
                    "script failed (matched '{pattern}')"
                )));
            }
        }
        inner.script_journal.push(sql.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::migration::store::ColumnKind;

    fn ledger_columns() -> Vec<ColumnSpec> {
        vec![
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
        ]
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicate_rows() {
        let store = MemoryStore::new();
        store.create_table("t", &ledger_columns()).await.unwrap();
        store
            .add_unique_index("t", &["version", "plugin"], "uniq")
            .await
            .unwrap();

        store
            .insert("t", &[("version", Some("1")), ("plugin", None)])
            .await
            .unwrap();
        let err = store
            .insert("t", &[("version", Some("1")), ("plugin", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));

        // Same version under a named namespace is a different pair.
        store
            .insert("t", &[("version", Some("1")), ("plugin", Some("blog"))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn null_filters_match_null_cells_only() {
        let store = MemoryStore::new();
        store.create_table("t", &ledger_columns()).await.unwrap();
        store
            .insert("t", &[("version", Some("1")), ("plugin", None)])
            .await
            .unwrap();
        store
            .insert("t", &[("version", Some("2")), ("plugin", Some("blog"))])
            .await
            .unwrap();

        let app = store
            .select_values("t", "version", &[("plugin", None)])
            .await
            .unwrap();
        assert_eq!(app, vec!["1"]);

        let blog = store
            .select_values("t", "version", &[("plugin", Some("blog"))])
            .await
            .unwrap();
        assert_eq!(blog, vec!["2"]);
    }

    #[tokio::test]
    async fn script_journal_preserves_order_and_failures_skip_it() {
        let store = MemoryStore::new();
        store.execute_script("CREATE TABLE a (id INTEGER)").await.unwrap();
        store.fail_scripts_containing("boom");
        assert!(store.execute_script("SELECT boom").await.is_err());
        assert_eq!(store.executed_scripts(), vec!["CREATE TABLE a (id INTEGER)"]);
    }
}
