//! Migration error types with clear, actionable messages.
//!
//! All errors name the offending file, version, or namespace so an
//! aborted run can be resolved without digging through logs.

use thiserror::Error;

use super::store::StoreError;

/// Errors that can occur while tracking or running migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The connected store cannot track schema migrations at all.
    #[error("this store does not support schema migrations")]
    UnsupportedStore,

    /// A file in the migration directory does not match `<version>_<name>.sql`.
    #[error("illegal migration file name: {file} (expected <version>_<name>.sql)")]
    MalformedName { file: String },

    /// Two discovered migrations claim the same version.
    #[error("multiple migrations have the version {version}")]
    DuplicateVersion { version: i64 },

    /// Two discovered migrations normalize to the same name.
    #[error("multiple migrations have the name {name}")]
    DuplicateName { name: String },

    /// The ledger already holds this (version, namespace) pair. Indicates
    /// the runner and the ledger disagree about what has been applied.
    #[error("version {version} is already recorded for {namespace}")]
    DuplicateRecord { version: i64, namespace: String },

    /// A migration's own up or down script failed. The run aborts here;
    /// earlier completed steps stay recorded.
    #[error("migration {version} {name} failed: {source}")]
    ScriptFailed {
        version: i64,
        name: String,
        #[source]
        source: StoreError,
    },

    /// A downgrade reached a migration with no down section.
    #[error("migration {version} {name} has no down section and cannot be reverted")]
    Irreversible { version: i64, name: String },

    /// The migration directory could not be read.
    #[error("failed to read migration directory {path}: {details}")]
    Discovery { path: String, details: String },

    /// Underlying store failure outside a migration script.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Human label for a namespace, used in error and log messages.
pub(crate) fn namespace_label(namespace: Option<&str>) -> String {
    match namespace {
        Some(name) => format!("plugin '{name}'"),
        None => "the application".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_offender() {
        let err = MigrationError::MalformedName {
            file: "db/migrate/banana.sql".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("banana.sql"));
        assert!(msg.contains("<version>_<name>.sql"));
    }

    #[test]
    fn duplicate_record_names_the_namespace() {
        let err = MigrationError::DuplicateRecord {
            version: 3,
            namespace: namespace_label(Some("blog")),
        };
        assert!(err.to_string().contains("plugin 'blog'"));

        let err = MigrationError::DuplicateRecord {
            version: 3,
            namespace: namespace_label(None),
        };
        assert!(err.to_string().contains("the application"));
    }
}
