//! Embedded relational store adapter.
//!
//! Opens the store with write-ahead journaling and foreign-key enforcement,
//! creating parent directories on demand. Exposes transactional scopes
//! (commit-or-rollback on drop) and the WAL checkpoint used after bulk
//! exports. Row access is by column name throughout the crate.

use anyhow::Context;
use rusqlite::{Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error surfaced by the embedded store.
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Filesystem failure around the store file.
    #[error("store io error: {0}")]
    Io(#[from] anyhow::Error),
}

/// Result of a WAL checkpoint: `(busy, log_frames, checkpointed_frames)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Non-zero when the checkpoint could not complete.
    pub busy: i64,
    /// Frames in the WAL.
    pub log_frames: i64,
    /// Frames moved into the database file.
    pub checkpointed_frames: i64,
}

/// Connection-owning handle to the embedded store.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the store at `db_path` with WAL journaling and
    /// foreign keys enabled.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        tracing::debug!(path = %db_path.display(), journal_mode = %mode, "store opened");
        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
        })
    }

    /// The store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the underlying connection for reads and autocommit writes.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transactional scope. Dropping the transaction rolls back;
    /// call `commit()` to keep the writes.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    /// Run a `NORMAL` WAL checkpoint. Used after bulk exports.
    pub fn checkpoint(&self) -> Result<CheckpointStats, StoreError> {
        let stats = self.conn.query_row("PRAGMA wal_checkpoint(NORMAL);", [], |row| {
            Ok(CheckpointStats {
                busy: row.get(0)?,
                log_frames: row.get(1)?,
                checkpointed_frames: row.get(2)?,
            })
        })?;
        tracing::info!(
            busy = stats.busy,
            log_frames = stats.log_frames,
            checkpointed = stats.checkpointed_frames,
            "DB_CHECKPOINT_NORMAL: WAL checkpoint performed"
        );
        Ok(stats)
    }

    /// Row count of a fixed, trusted table name.
    pub fn table_count(&self, table: &str) -> Result<i64, StoreError> {
        let count = self
            .conn
            .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_dirs_and_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("trustint.db");
        let store = Store::open(&db).unwrap();
        let mode: String = store
            .connection()
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let fk: i64 = store
            .connection()
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert!(db.exists());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("t.db")).unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE probe (n INTEGER);")
            .unwrap();
        {
            let tx = store.transaction().unwrap();
            tx.execute("INSERT INTO probe (n) VALUES (1)", []).unwrap();
            // No commit.
        }
        assert_eq!(store.table_count("probe").unwrap(), 0);

        let tx = store.transaction().unwrap();
        tx.execute("INSERT INTO probe (n) VALUES (1)", []).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.table_count("probe").unwrap(), 1);
    }

    #[test]
    fn checkpoint_runs_on_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("t.db")).unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE probe (n INTEGER);")
            .unwrap();
        let stats = store.checkpoint().unwrap();
        assert_eq!(stats.busy, 0);
    }
}
