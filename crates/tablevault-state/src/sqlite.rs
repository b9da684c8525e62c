//! `SQLite`-backed implementation of [`CheckpointStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tablevault_types::checkpoint::{Checkpoint, CheckpointScope, UpsertOutcome};

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};

/// Fixed-width UTC format; lexicographic order equals chronological order.
const SQLITE_TS_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Idempotent DDL for the checkpoint table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS archive_checkpoints (
    scope TEXT NOT NULL,
    object_name TEXT NOT NULL,
    last_backup_ts TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope, object_name)
);
";

/// `SQLite`-backed checkpoint storage.
///
/// Create with [`SqliteCheckpointStore::open`] for file-backed persistence
/// or [`SqliteCheckpointStore::in_memory`] for tests.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create a `SQLite` checkpoint database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn encode_ts(ts: DateTime<Utc>) -> String {
        ts.format(SQLITE_TS_FMT).to_string()
    }

    fn decode_ts(raw: &str) -> error::Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, SQLITE_TS_FMT)
            .map(|ndt| ndt.and_utc())
            .map_err(|e| StateError::Corrupt(format!("timestamp '{raw}': {e}")))
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get(&self, scope: CheckpointScope, object: &str) -> error::Result<Option<DateTime<Utc>>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_backup_ts FROM archive_checkpoints \
                 WHERE scope = ?1 AND object_name = ?2",
                rusqlite::params![scope.as_str(), object],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::backend)?;
        raw.as_deref().map(Self::decode_ts).transpose()
    }

    fn upsert(
        &self,
        scope: CheckpointScope,
        object: &str,
        ts: DateTime<Utc>,
    ) -> error::Result<UpsertOutcome> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(StateError::backend)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT last_backup_ts FROM archive_checkpoints \
                 WHERE scope = ?1 AND object_name = ?2",
                rusqlite::params![scope.as_str(), object],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::backend)?;

        let outcome = match existing.as_deref().map(Self::decode_ts).transpose()? {
            Some(stored) if stored >= ts => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Advanced,
            None => UpsertOutcome::Inserted,
        };

        if outcome != UpsertOutcome::Unchanged {
            tx.execute(
                "INSERT INTO archive_checkpoints (scope, object_name, last_backup_ts, updated_at) \
                 VALUES (?1, ?2, ?3, datetime('now')) \
                 ON CONFLICT(scope, object_name) \
                 DO UPDATE SET last_backup_ts = excluded.last_backup_ts, \
                 updated_at = excluded.updated_at \
                 WHERE excluded.last_backup_ts > archive_checkpoints.last_backup_ts",
                rusqlite::params![scope.as_str(), object, Self::encode_ts(ts)],
            )
            .map_err(StateError::backend)?;
        }

        tx.commit().map_err(StateError::backend)?;
        Ok(outcome)
    }

    fn list(&self) -> error::Result<Vec<Checkpoint>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT scope, object_name, last_backup_ts FROM archive_checkpoints \
                 ORDER BY scope, object_name",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(StateError::backend)?;

        let mut out = Vec::new();
        for row in rows {
            let (scope, object_name, ts) = row.map_err(StateError::backend)?;
            out.push(Checkpoint {
                scope: scope.parse().map_err(StateError::Corrupt)?,
                object_name,
                last_backup_ts: Self::decode_ts(&ts)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store
            .get(CheckpointScope::Table, "orders")
            .unwrap()
            .is_none());
    }

    #[test]
    fn first_upsert_inserts() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let outcome = store
            .upsert(CheckpointScope::Table, "orders", ts(2023, 2, 1))
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(
            store.get(CheckpointScope::Table, "orders").unwrap(),
            Some(ts(2023, 2, 1))
        );
    }

    #[test]
    fn upsert_advances_and_never_regresses() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .upsert(CheckpointScope::Table, "orders", ts(2023, 2, 1))
            .unwrap();
        assert_eq!(
            store
                .upsert(CheckpointScope::Table, "orders", ts(2023, 3, 1))
                .unwrap(),
            UpsertOutcome::Advanced
        );
        assert_eq!(
            store
                .upsert(CheckpointScope::Table, "orders", ts(2023, 1, 1))
                .unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            store
                .upsert(CheckpointScope::Table, "orders", ts(2023, 3, 1))
                .unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            store.get(CheckpointScope::Table, "orders").unwrap(),
            Some(ts(2023, 3, 1))
        );
    }

    #[test]
    fn scopes_are_independent_keys() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .upsert(CheckpointScope::Database, "shop", ts(2023, 2, 1))
            .unwrap();
        store
            .upsert(CheckpointScope::Table, "shop", ts(2023, 1, 1))
            .unwrap();
        assert_eq!(
            store.get(CheckpointScope::Database, "shop").unwrap(),
            Some(ts(2023, 2, 1))
        );
        assert_eq!(
            store.get(CheckpointScope::Table, "shop").unwrap(),
            Some(ts(2023, 1, 1))
        );
    }

    #[test]
    fn sub_second_precision_survives() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let precise = ts(2023, 2, 1) + Duration::microseconds(123_456);
        store
            .upsert(CheckpointScope::Table, "orders", precise)
            .unwrap();
        assert_eq!(
            store.get(CheckpointScope::Table, "orders").unwrap(),
            Some(precise)
        );
    }

    #[test]
    fn list_is_ordered() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .upsert(CheckpointScope::Table, "users", ts(2023, 1, 1))
            .unwrap();
        store
            .upsert(CheckpointScope::Table, "orders", ts(2023, 1, 2))
            .unwrap();
        store
            .upsert(CheckpointScope::Database, "shop", ts(2023, 1, 3))
            .unwrap();
        let names: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|c| (c.scope, c.object_name))
            .collect();
        assert_eq!(
            names,
            vec![
                (CheckpointScope::Database, "shop".to_string()),
                (CheckpointScope::Table, "orders".to_string()),
                (CheckpointScope::Table, "users".to_string()),
            ]
        );
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store
                .upsert(CheckpointScope::Table, "orders", ts(2023, 2, 1))
                .unwrap();
        }
        let store = SqliteCheckpointStore::open(&path).unwrap();
        assert_eq!(
            store.get(CheckpointScope::Table, "orders").unwrap(),
            Some(ts(2023, 2, 1))
        );
    }

    proptest! {
        #[test]
        fn stored_value_is_running_maximum(offsets in proptest::collection::vec(0i64..10_000, 1..20)) {
            let store = SqliteCheckpointStore::in_memory().unwrap();
            let base = ts(2020, 1, 1);
            let mut max = None;
            for off in offsets {
                let t = base + Duration::seconds(off);
                store.upsert(CheckpointScope::Table, "t", t).unwrap();
                max = Some(max.map_or(t, |m: DateTime<Utc>| m.max(t)));
                prop_assert_eq!(store.get(CheckpointScope::Table, "t").unwrap(), max);
            }
        }
    }
}
