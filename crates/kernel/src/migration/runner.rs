//! Migration discovery and sequential execution.
//!
//! Discovers `<version>_<name>.sql` files in a directory, orders them for
//! the requested direction, and applies or reverts them one at a time,
//! recording each completed step in the [`Ledger`]. Runs are strictly
//! sequential; the first failing unit aborts the run and earlier completed
//! steps stay recorded. There is no cross-process locking here, so callers
//! must serialize concurrent runs themselves.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::error::{MigrationError, namespace_label};
use super::ledger::Ledger;
use super::script::MigrationScript;
use super::store::MigrationStore;

/// Migration file names: `<version>_<snake_case_name>.sql`.
static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // The pattern is a literal and cannot fail to compile.
    #[allow(clippy::expect_used)]
    Regex::new(r"^([0-9]+)_([a-z0-9_]+)\.sql$").expect("valid filename pattern")
});

/// Which way a run moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// One discoverable migration, immutable for the lifetime of a scan.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    /// Ordering identifier, unique within the namespace.
    pub version: i64,
    /// Camelized name derived from the file name, unique within the
    /// namespace (`003_create_posts.sql` becomes `CreatePosts`).
    pub name: String,
    /// Owning plugin; `None` is the application itself.
    pub namespace: Option<String>,
    /// Where the unit was loaded from.
    pub path: PathBuf,
    /// The loaded up/down statement pair.
    pub script: MigrationScript,
}

/// Convert a snake_case file stem into a CamelCase migration name.
fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Scan `path` for migration files, returning units sorted ascending by
/// version. A missing directory yields an empty set. Non-SQL files are
/// skipped; an SQL file that does not match the naming pattern, or a
/// version/name collision, fails the whole scan.
pub fn discover(
    path: &Path,
    namespace: Option<&str>,
) -> Result<Vec<MigrationUnit>, MigrationError> {
    let mut units: Vec<MigrationUnit> = Vec::new();

    if !path.exists() {
        debug!(path = %path.display(), "migration directory does not exist, nothing to discover");
        return Ok(units);
    }

    let entries = fs::read_dir(path).map_err(|e| MigrationError::Discovery {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for file in files {
        let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            debug!(file = file_name, "skipping non-migration file");
            continue;
        }

        let caps =
            FILENAME_PATTERN
                .captures(file_name)
                .ok_or_else(|| MigrationError::MalformedName {
                    file: file.display().to_string(),
                })?;
        let version: i64 = caps[1].parse().map_err(|_| MigrationError::MalformedName {
            file: file.display().to_string(),
        })?;
        let name = camelize(&caps[2]);

        if units.iter().any(|u| u.version == version) {
            return Err(MigrationError::DuplicateVersion { version });
        }
        if units.iter().any(|u| u.name == name) {
            return Err(MigrationError::DuplicateName { name });
        }

        let source = fs::read_to_string(&file).map_err(|e| MigrationError::Discovery {
            path: file.display().to_string(),
            details: e.to_string(),
        })?;

        units.push(MigrationUnit {
            version,
            name,
            namespace: namespace.map(str::to_string),
            path: file,
            script: MigrationScript::parse(&source),
        });
    }

    units.sort_by_key(|u| u.version);
    Ok(units)
}

/// Applies or reverts discovered migrations toward a target version.
///
/// One instance covers one run: the applied-version set is loaded once at
/// construction and maintained locally as steps complete, never shared
/// across invocations.
pub struct Migrator {
    store: Arc<dyn MigrationStore>,
    ledger: Ledger,
    direction: Direction,
    target: Option<i64>,
    namespace: Option<String>,
    units: Vec<MigrationUnit>,
    migrated: BTreeSet<i64>,
}

impl Migrator {
    /// Build a runner for one direction. Ensures the ledger exists (and
    /// that the store supports migrations), scans `path`, and loads the
    /// applied-version set for `namespace`.
    pub async fn new(
        store: Arc<dyn MigrationStore>,
        direction: Direction,
        path: &Path,
        target: Option<i64>,
        namespace: Option<&str>,
    ) -> Result<Self, MigrationError> {
        let ledger = Ledger::new(store.clone());
        ledger.ensure_ledger().await?;

        let mut units = discover(path, namespace)?;
        if direction == Direction::Down {
            units.reverse();
        }

        let migrated = ledger.applied_versions(namespace).await?;

        Ok(Self {
            store,
            ledger,
            direction,
            target,
            namespace: namespace.map(str::to_string),
            units,
            migrated,
        })
    }

    /// Migrate `namespace` to `target`. Direction is inferred from the
    /// current version: below target (or no target, meaning the latest
    /// discovered version) migrates up, above target migrates down.
    pub async fn migrate(
        store: Arc<dyn MigrationStore>,
        path: &Path,
        target: Option<i64>,
        namespace: Option<&str>,
    ) -> Result<(), MigrationError> {
        let ledger = Ledger::new(store.clone());
        ledger.ensure_ledger().await?;
        let current = ledger.current_version(namespace).await?;

        match target {
            Some(target) if current > target => {
                Self::down(store, path, Some(target), namespace).await
            }
            _ => Self::up(store, path, target, namespace).await,
        }
    }

    /// Apply pending migrations up to `target` (all of them when `None`).
    pub async fn up(
        store: Arc<dyn MigrationStore>,
        path: &Path,
        target: Option<i64>,
        namespace: Option<&str>,
    ) -> Result<(), MigrationError> {
        Self::new(store, Direction::Up, path, target, namespace)
            .await?
            .run()
            .await
    }

    /// Revert applied migrations down to (but not including) `target`.
    pub async fn down(
        store: Arc<dyn MigrationStore>,
        path: &Path,
        target: Option<i64>,
        namespace: Option<&str>,
    ) -> Result<(), MigrationError> {
        Self::new(store, Direction::Down, path, target, namespace)
            .await?
            .run()
            .await
    }

    /// Revert the most recent `steps` applied migrations.
    ///
    /// Finds the currently-applied migration in downgrade order and
    /// targets the version `steps` positions further down the list, or 0
    /// when that runs past the end. A ledger with no applied migration in
    /// the discovered set makes this a no-op: there is nothing meaningful
    /// to roll back.
    pub async fn rollback(
        store: Arc<dyn MigrationStore>,
        path: &Path,
        steps: usize,
        namespace: Option<&str>,
    ) -> Result<(), MigrationError> {
        let migrator = Self::new(store.clone(), Direction::Down, path, None, namespace).await?;

        let Some(start) = migrator
            .units
            .iter()
            .position(|unit| migrator.migrated.contains(&unit.version))
        else {
            warn!(
                path = %path.display(),
                namespace = namespace.unwrap_or("application"),
                "no applied migration found in the discovered set, nothing to roll back"
            );
            return Ok(());
        };

        let finish = migrator
            .units
            .get(start + steps)
            .map(|unit| unit.version)
            .unwrap_or(0);

        Self::down(store, path, Some(finish), namespace).await
    }

    /// The discovered units, in this run's direction order.
    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    /// Execute the run: walk the ordered units, skip the ones already on
    /// the right side of the ledger, and stop at the target. The first
    /// failure aborts; completed steps stay recorded.
    pub async fn run(mut self) -> Result<(), MigrationError> {
        let units = self.units.clone();
        let mut ran = 0usize;

        for unit in &units {
            if !self.within_target(unit) {
                continue;
            }
            let applied = self.migrated.contains(&unit.version);
            match self.direction {
                Direction::Up if applied => {
                    debug!(version = unit.version, "already applied, skipping");
                    continue;
                }
                Direction::Down if !applied => {
                    debug!(version = unit.version, "not applied, skipping");
                    continue;
                }
                _ => {}
            }

            self.execute(unit).await?;
            ran += 1;
        }

        if ran == 0 {
            debug!(
                namespace = self.namespace.as_deref().unwrap_or("application"),
                "no pending migrations"
            );
        }
        Ok(())
    }

    /// Whether `unit` lies on this run's side of the target version.
    fn within_target(&self, unit: &MigrationUnit) -> bool {
        match (self.direction, self.target) {
            (Direction::Up, Some(target)) => unit.version <= target,
            (Direction::Down, Some(target)) => unit.version > target,
            (_, None) => true,
        }
    }

    /// Run one unit's script and update the ledger. Script failures abort
    /// with the unit identified; there is no atomic rollback of a
    /// partially-executed script.
    async fn execute(&mut self, unit: &MigrationUnit) -> Result<(), MigrationError> {
        info!(
            version = unit.version,
            name = %unit.name,
            namespace = %namespace_label(self.namespace.as_deref()),
            direction = ?self.direction,
            "running migration"
        );

        let namespace = self.namespace.as_deref();
        match self.direction {
            Direction::Up => {
                self.store
                    .execute_script(&unit.script.up)
                    .await
                    .map_err(|source| MigrationError::ScriptFailed {
                        version: unit.version,
                        name: unit.name.clone(),
                        source,
                    })?;
                self.ledger.record_applied(unit.version, namespace).await?;
                self.migrated.insert(unit.version);
            }
            Direction::Down => {
                let down =
                    unit.script
                        .down
                        .as_deref()
                        .ok_or_else(|| MigrationError::Irreversible {
                            version: unit.version,
                            name: unit.name.clone(),
                        })?;
                self.store
                    .execute_script(down)
                    .await
                    .map_err(|source| MigrationError::ScriptFailed {
                        version: unit.version,
                        name: unit.name.clone(),
                        source,
                    })?;
                self.ledger.record_reverted(unit.version, namespace).await?;
                self.migrated.remove(&unit.version);
            }
        }
        Ok(())
    }
}
