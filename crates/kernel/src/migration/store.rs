//! Persistent-store seam for the migration system.
//!
//! The ledger and runner never talk to a database directly. They depend on
//! [`MigrationStore`], a small set of relational primitives that any
//! SQL-capable backend can provide. Values always travel separately from
//! statement text; [`PgStore`] binds every value as a query parameter.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use thiserror::Error;

/// Errors surfaced by a migration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert violated a unique index.
    #[error("unique index {index} violated on {table}")]
    UniqueViolation { table: String, index: String },

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure specific to a non-SQL backend.
    #[error("{0}")]
    Backend(String),
}

/// Column types the migration system creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Varchar,
    Integer,
}

/// One column in a `create_table` call.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// Relational primitives the migration system needs from a backend.
///
/// Row values are carried as `Option<String>`; `None` is SQL `NULL`, and a
/// `None` in a filter matches `IS NULL`. Identifiers (table, column, and
/// index names) come from the caller's own constants, never from user input.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Whether this backend supports schema migrations at all.
    fn supports_migrations(&self) -> bool {
        true
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    async fn create_table(&self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError>;

    async fn add_unique_index(
        &self,
        table: &str,
        columns: &[&str],
        index: &str,
    ) -> Result<(), StoreError>;

    async fn drop_table(&self, table: &str) -> Result<(), StoreError>;

    /// Values of `column` for every row matching `filters`.
    async fn select_values(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Vec<String>, StoreError>;

    /// First value of `column` for rows matching `filters`, if any.
    async fn select_value(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Option<String>, StoreError>;

    /// Insert one row. Unique-index collisions surface as
    /// [`StoreError::UniqueViolation`].
    async fn insert(&self, table: &str, values: &[(&str, Option<&str>)])
    -> Result<(), StoreError>;

    /// Update matching rows, returning how many were changed.
    async fn update(
        &self,
        table: &str,
        assignments: &[(&str, Option<&str>)],
        filters: &[(&str, Option<&str>)],
    ) -> Result<u64, StoreError>;

    /// Delete matching rows, returning how many were removed.
    async fn delete(
        &self,
        table: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<u64, StoreError>;

    /// Run a migration unit's script. Scripts may contain multiple
    /// statements and run outside any prepared-statement machinery.
    async fn execute_script(&self, sql: &str) -> Result<(), StoreError>;
}

/// PostgreSQL-backed [`MigrationStore`] over a sqlx pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Render a WHERE clause for `filters`, numbering bind placeholders from
/// `next_placeholder`. `None` values become `IS NULL` and consume no
/// placeholder. Returns an empty string when there are no filters.
fn render_where(filters: &[(&str, Option<&str>)], mut next_placeholder: usize) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let mut clauses = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        match value {
            Some(_) => {
                clauses.push(format!("{column} = ${next_placeholder}"));
                next_placeholder += 1;
            }
            None => clauses.push(format!("{column} IS NULL")),
        }
    }

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Bind the non-NULL filter values onto a query, in clause order.
fn bind_filters<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    filters: &'q [(&str, Option<&str>)],
) -> Query<'q, Postgres, PgArguments> {
    for (_, value) in filters {
        if let Some(value) = value {
            query = query.bind(*value);
        }
    }
    query
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_table(&self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError> {
        let rendered: Vec<String> = columns
            .iter()
            .map(|c| {
                let kind = match c.kind {
                    ColumnKind::Varchar => "VARCHAR(255)",
                    ColumnKind::Integer => "INTEGER",
                };
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", c.name, kind, null)
            })
            .collect();

        let sql = format!("CREATE TABLE {table} ({})", rendered.join(", "));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn add_unique_index(
        &self,
        table: &str,
        columns: &[&str],
        index: &str,
    ) -> Result<(), StoreError> {
        // NULLS NOT DISTINCT so a NULL namespace collides with itself the
        // same way a named one does. Requires PostgreSQL 15.
        let sql = format!(
            "CREATE UNIQUE INDEX {index} ON {table} ({}) NULLS NOT DISTINCT",
            columns.join(", ")
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let sql = format!("DROP TABLE {table}");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn select_values(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT {column} FROM {table}{}",
            render_where(filters, 1)
        );
        let rows = bind_filters(sqlx::query(&sql), filters)
            .fetch_all(&self.pool)
            .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            values.push(decode_text(&row)?);
        }
        Ok(values)
    }

    async fn select_value(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Option<String>, StoreError> {
        let sql = format!(
            "SELECT {column} FROM {table}{} LIMIT 1",
            render_where(filters, 1)
        );
        let row = bind_filters(sqlx::query(&sql), filters)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(decode_text(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(
        &self,
        table: &str,
        values: &[(&str, Option<&str>)],
    ) -> Result<(), StoreError> {
        let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|n| format!("${n}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in values {
            query = query.bind(*value);
        }

        match query.execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::UniqueViolation {
                    table: table.to_string(),
                    index: db.constraint().unwrap_or("unknown").to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(
        &self,
        table: &str,
        assignments: &[(&str, Option<&str>)],
        filters: &[(&str, Option<&str>)],
    ) -> Result<u64, StoreError> {
        let mut placeholder = 1;
        let mut sets = Vec::with_capacity(assignments.len());
        for (column, value) in assignments {
            match value {
                Some(_) => {
                    sets.push(format!("{column} = ${placeholder}"));
                    placeholder += 1;
                }
                None => sets.push(format!("{column} = NULL")),
            }
        }

        let sql = format!(
            "UPDATE {table} SET {}{}",
            sets.join(", "),
            render_where(filters, placeholder)
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in assignments {
            if let Some(value) = value {
                query = query.bind(*value);
            }
        }
        let result = bind_filters(query, filters).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(
        &self,
        table: &str,
        filters: &[(&str, Option<&str>)],
    ) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {table}{}", render_where(filters, 1));
        let result = bind_filters(sqlx::query(&sql), filters)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&self, sql: &str) -> Result<(), StoreError> {
        // raw_sql because migration scripts contain multiple statements;
        // prepared statements only support one statement per call.
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// Decode column 0 as text. The ledger stores versions as VARCHAR, but the
/// legacy `schema_info` marker is an INTEGER column, so fall back to the
/// integer decodings before giving up.
fn decode_text(row: &sqlx::postgres::PgRow) -> Result<String, StoreError> {
    row.try_get::<String, _>(0)
        .or_else(|_| row.try_get::<i64, _>(0).map(|v| v.to_string()))
        .or_else(|_| row.try_get::<i32, _>(0).map(|v| v.to_string()))
        .map_err(StoreError::from)
}
