//! Versioned, forward-only schema migrations.
//!
//! Migration artifacts live in one directory and are named
//! `V<digits>__<identifier>.sql`; anything else is ignored. The store tracks
//! its version in the singleton row `schema_version (id=1, version)`. Each
//! pending script executes as one batch in its own transaction together with
//! the version-row update, so a crash leaves the store at the last fully
//! applied migration. Every applied step emits a `MIGRATION_APPLY` ledger
//! event carrying the script name and its content hash.

use anyhow::Context;
use regex::Regex;
use rusqlite::{OptionalExtension, Transaction};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::digest::sha256_bytes;
use crate::ledger::{Ledger, LedgerError};
use crate::store::{Store, StoreError};
use trustint_spec::event;

fn file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^V(\d+)__([A-Za-z0-9_]+)\.sql$").expect("migration pattern is valid")
    })
}

/// Errors raised by the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two scripts parse to the same version number.
    #[error("duplicate migration version {0}")]
    DuplicateVersion(i64),
    /// Store failure while applying.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Ledger append failure after a commit.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Filesystem failure while discovering or reading scripts.
    #[error("migration io error: {0}")]
    Io(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        MigrationError::Store(StoreError::Sqlite(err))
    }
}

/// One discovered migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Parsed version number.
    pub version: i64,
    /// Script file name (e.g. `V001__baseline.sql`).
    pub name: String,
    /// Full path to the script.
    pub path: PathBuf,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Version before the run.
    pub from_version: i64,
    /// Version after the run.
    pub to_version: i64,
    /// Names of the scripts applied, in order.
    pub applied: Vec<String>,
}

/// Discover migrations in `dir`, ascending by version. Non-matching file
/// names are ignored; a missing directory is an empty set.
pub fn discover(dir: &Path) -> Result<Vec<Migration>, MigrationError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read migration directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read migration directory {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = file_pattern().captures(&name) else {
            continue;
        };
        let version: i64 = caps[1]
            .parse()
            .with_context(|| format!("unparseable migration version in {name}"))?;
        found.push(Migration {
            version,
            name,
            path: entry.path(),
        });
    }
    found.sort_by_key(|m| m.version);
    for pair in found.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(MigrationError::DuplicateVersion(pair[0].version));
        }
    }
    Ok(found)
}

/// Read the current schema version, creating (or collapsing a legacy shape
/// of) the version table if needed.
pub fn current_version(store: &mut Store) -> Result<i64, MigrationError> {
    let tx = store.transaction()?;
    let version = ensure_version_row(&tx)?;
    tx.commit().map_err(StoreError::from)?;
    Ok(version)
}

/// Apply all pending migrations up to `target` (default: highest
/// discovered). No-op when the store is already at or past the target.
pub fn run_migrations(
    store: &mut Store,
    ledger: &Ledger,
    dir: &Path,
    target: Option<i64>,
) -> Result<MigrationOutcome, MigrationError> {
    let migrations = discover(dir)?;
    let from_version = current_version(store)?;
    let highest = migrations.last().map(|m| m.version).unwrap_or(from_version);
    let target = target.unwrap_or(highest);

    let mut outcome = MigrationOutcome {
        from_version,
        to_version: from_version,
        applied: Vec::new(),
    };
    if from_version >= target {
        tracing::info!(version = from_version, target, "schema already at target");
        return Ok(outcome);
    }

    for migration in migrations
        .iter()
        .filter(|m| m.version > from_version && m.version <= target)
    {
        let span = tracing::info_span!("migration_apply", script = %migration.name);
        let _guard = span.enter();

        let script = fs::read_to_string(&migration.path)
            .with_context(|| format!("failed to read migration {}", migration.path.display()))?;
        let script_hash = sha256_bytes(script.as_bytes());

        let tx = store.transaction()?;
        tx.execute_batch(&script).map_err(StoreError::from)?;
        set_version(&tx, migration.version)?;
        tx.commit().map_err(StoreError::from)?;

        ledger.append_kv(&[
            ("type", json!(event::MIGRATION_APPLY)),
            ("version", json!(migration.version)),
            ("script", json!(migration.name)),
            ("sha256", json!(script_hash)),
        ])?;
        tracing::info!(version = migration.version, "migration applied");

        outcome.to_version = migration.version;
        outcome.applied.push(migration.name.clone());
    }
    Ok(outcome)
}

/// Ensure the singleton version row exists and return its value. A legacy
/// multi-row table (no `id` column) is collapsed to `MAX(version)` inside
/// the caller's transaction.
fn ensure_version_row(tx: &Transaction<'_>) -> Result<i64, MigrationError> {
    let has_table: Option<String> = tx
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    if has_table.is_some() && !has_id_column(tx)? {
        let max: Option<i64> = tx
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();
        let max = max.unwrap_or(0);
        tx.execute_batch(
            "DROP TABLE schema_version;
             CREATE TABLE schema_version (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 version INTEGER NOT NULL
             );",
        )?;
        tx.execute(
            "INSERT INTO schema_version (id, version) VALUES (1, ?1)",
            [max],
        )?;
        tracing::warn!(version = max, "collapsed legacy schema_version table");
        return Ok(max);
    }

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             version INTEGER NOT NULL
         );",
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_version (id, version) VALUES (1, 0)",
        [],
    )?;
    let version = tx.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    Ok(version)
}

fn set_version(tx: &Transaction<'_>, version: i64) -> Result<(), MigrationError> {
    ensure_version_row(tx)?;
    tx.execute("UPDATE schema_version SET version = ?1 WHERE id = 1", [version])?;
    Ok(())
}

fn has_id_column(tx: &Transaction<'_>) -> Result<bool, MigrationError> {
    let mut stmt = tx.prepare("PRAGMA table_info(schema_version)")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == "id" {
            return Ok(true);
        }
    }
    Ok(false)
}
