//! End-to-end migration runner tests against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use binario_kernel::migration::memory::MemoryStore;
use binario_kernel::migration::{
    LEDGER_TABLE, LEGACY_TABLE, Ledger, MigrationError, MigrationStore, Migrator,
};

fn write_migration(dir: &Path, file: &str, up: &str, down: &str) {
    fs::write(dir.join(file), format!("-- up\n{up}\n-- down\n{down}\n")).unwrap();
}

/// A directory with migrations 1..=n, each creating and dropping its own
/// table so the script journal identifies exactly what ran.
fn numbered_migrations(n: i64) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for v in 1..=n {
        write_migration(
            dir.path(),
            &format!("{v}_step_{v}.sql"),
            &format!("CREATE TABLE t{v} (id INTEGER);"),
            &format!("DROP TABLE t{v};"),
        );
    }
    dir
}

fn store_and_ledger() -> (Arc<MemoryStore>, Ledger) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone());
    (store, ledger)
}

#[tokio::test]
async fn ascending_apply_reaches_the_maximum_version() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(3);

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();

    assert_eq!(ledger.current_version(None).await.unwrap(), 3);
    assert_eq!(
        ledger.applied_versions(None).await.unwrap(),
        (1..=3).collect::<BTreeSet<i64>>()
    );
    assert_eq!(
        store.executed_scripts(),
        vec![
            "CREATE TABLE t1 (id INTEGER);",
            "CREATE TABLE t2 (id INTEGER);",
            "CREATE TABLE t3 (id INTEGER);",
        ]
    );
}

#[tokio::test]
async fn migrating_twice_to_the_same_target_runs_nothing_new() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(3);

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();
    let journal_after_first = store.executed_scripts();
    let applied_after_first = ledger.applied_versions(None).await.unwrap();

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();

    assert_eq!(store.executed_scripts(), journal_after_first);
    assert_eq!(
        ledger.applied_versions(None).await.unwrap(),
        applied_after_first
    );
}

#[tokio::test]
async fn forward_then_backward_leaves_no_record() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(1);

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();
    assert_eq!(ledger.current_version(None).await.unwrap(), 1);

    Migrator::migrate(store.clone(), dir.path(), Some(0), None)
        .await
        .unwrap();

    assert!(ledger.applied_versions(None).await.unwrap().is_empty());
    assert_eq!(
        store.executed_scripts(),
        vec!["CREATE TABLE t1 (id INTEGER);", "DROP TABLE t1;"]
    );
}

#[tokio::test]
async fn namespaces_do_not_observe_each_other() {
    let (store, ledger) = store_and_ledger();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "5_add_blog.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");

    Migrator::migrate(store.clone(), dir.path(), None, Some("a"))
        .await
        .unwrap();

    assert_eq!(ledger.current_version(Some("a")).await.unwrap(), 5);
    assert_eq!(ledger.current_version(Some("b")).await.unwrap(), 0);
    assert_eq!(ledger.current_version(None).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_versions_fail_discovery_without_touching_the_ledger() {
    let (store, ledger) = store_and_ledger();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "003_create_posts.sql", "A;", "B;");
    write_migration(dir.path(), "3_create_comments.sql", "C;", "D;");

    let err = Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::DuplicateVersion { version: 3 }));
    assert!(store.executed_scripts().is_empty());
    assert!(ledger.applied_versions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn rollback_reverts_exactly_the_requested_steps() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(4);

    // Versions 1..=3 applied; 4 discovered but never run.
    Migrator::migrate(store.clone(), dir.path(), Some(3), None)
        .await
        .unwrap();
    assert_eq!(ledger.current_version(None).await.unwrap(), 3);

    Migrator::rollback(store.clone(), dir.path(), 1, None)
        .await
        .unwrap();

    assert_eq!(ledger.current_version(None).await.unwrap(), 2);
    assert_eq!(
        store.executed_scripts().last().map(String::as_str),
        Some("DROP TABLE t3;")
    );
}

#[tokio::test]
async fn rollback_past_the_oldest_migration_targets_zero() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(2);

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();

    Migrator::rollback(store.clone(), dir.path(), 10, None)
        .await
        .unwrap();

    assert_eq!(ledger.current_version(None).await.unwrap(), 0);
}

#[tokio::test]
async fn rollback_with_no_applied_history_is_a_no_op() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(2);

    Migrator::rollback(store.clone(), dir.path(), 1, None)
        .await
        .unwrap();

    assert!(ledger.applied_versions(None).await.unwrap().is_empty());
    assert!(store.executed_scripts().is_empty());
}

#[tokio::test]
async fn legacy_marker_seeds_the_ledger_on_first_migrate() {
    let store = Arc::new(MemoryStore::new());
    {
        use binario_kernel::migration::{ColumnKind, ColumnSpec};
        store
            .create_table(
                LEGACY_TABLE,
                &[ColumnSpec {
                    name: "version",
                    kind: ColumnKind::Integer,
                    nullable: false,
                }],
            )
            .await
            .unwrap();
        store
            .insert(LEGACY_TABLE, &[("version", Some("7"))])
            .await
            .unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();

    let ledger = Ledger::new(store.clone());
    assert_eq!(ledger.current_version(None).await.unwrap(), 7);
    assert_eq!(
        ledger.applied_versions(None).await.unwrap(),
        (1..=7).collect::<BTreeSet<i64>>()
    );
    assert!(!store.table_exists(LEGACY_TABLE).await.unwrap());
    assert!(store.table_exists(LEDGER_TABLE).await.unwrap());
}

#[tokio::test]
async fn target_below_current_downgrades_in_descending_order() {
    let (store, ledger) = store_and_ledger();
    let dir = numbered_migrations(10);

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();
    assert_eq!(ledger.current_version(None).await.unwrap(), 10);

    Migrator::migrate(store.clone(), dir.path(), Some(5), None)
        .await
        .unwrap();

    assert_eq!(ledger.current_version(None).await.unwrap(), 5);
    let journal = store.executed_scripts();
    let downs: Vec<&str> = journal
        .iter()
        .filter(|s| s.starts_with("DROP"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        downs,
        vec![
            "DROP TABLE t10;",
            "DROP TABLE t9;",
            "DROP TABLE t8;",
            "DROP TABLE t7;",
            "DROP TABLE t6;",
        ]
    );
    assert_eq!(
        ledger.applied_versions(None).await.unwrap(),
        (1..=5).collect::<BTreeSet<i64>>()
    );
}

#[tokio::test]
async fn a_failing_script_aborts_the_run_and_keeps_earlier_steps() {
    let (store, ledger) = store_and_ledger();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "1_ok.sql", "CREATE TABLE t1 (id INTEGER);", "DROP TABLE t1;");
    write_migration(dir.path(), "2_bad.sql", "CREATE TABLE boom (id INTEGER);", "DROP TABLE boom;");
    write_migration(dir.path(), "3_never.sql", "CREATE TABLE t3 (id INTEGER);", "DROP TABLE t3;");
    store.fail_scripts_containing("boom");

    let err = Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap_err();

    match err {
        MigrationError::ScriptFailed { version, ref name, .. } => {
            assert_eq!(version, 2);
            assert_eq!(name, "Bad");
        }
        other => panic!("expected ScriptFailed, got {other}"),
    }

    // Version 1 completed and stays recorded; version 3 never ran.
    assert_eq!(
        ledger.applied_versions(None).await.unwrap(),
        std::iter::once(1).collect::<BTreeSet<i64>>()
    );
    assert_eq!(store.executed_scripts(), vec!["CREATE TABLE t1 (id INTEGER);"]);
}

#[tokio::test]
async fn reverting_a_migration_without_a_down_section_fails() {
    let (store, _ledger) = store_and_ledger();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("1_one_way.sql"),
        "-- up\nCREATE TABLE t1 (id INTEGER);\n",
    )
    .unwrap();

    Migrator::migrate(store.clone(), dir.path(), None, None)
        .await
        .unwrap();

    let err = Migrator::migrate(store.clone(), dir.path(), Some(0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Irreversible { version: 1, .. }));
}

#[tokio::test]
async fn stores_without_migration_support_are_rejected() {
    let store = Arc::new(MemoryStore::unsupported());
    let dir = tempfile::tempdir().unwrap();

    let err = Migrator::migrate(store, dir.path(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::UnsupportedStore));
}
