//! `PostgreSQL`-backed implementation of [`CheckpointStore`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>` for
//! thread safety. The `postgres` crate manages its own internal tokio
//! runtime, so this works from any thread.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use tablevault_types::checkpoint::{Checkpoint, CheckpointScope, UpsertOutcome};

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};

/// Idempotent DDL for the checkpoint table (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS archive_checkpoints (
    scope TEXT NOT NULL,
    object_name TEXT NOT NULL,
    last_backup_ts TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (scope, object_name)
);
";

/// `PostgreSQL`-backed checkpoint storage.
///
/// Create with [`PostgresCheckpointStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=archiver user=postgres"`).
pub struct PostgresCheckpointStore {
    client: Mutex<Client>,
}

impl PostgresCheckpointStore {
    /// Connect to a `PostgreSQL` database and initialize the checkpoint table.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if connection or DDL execution fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let mut client = Client::connect(connstr, NoTls).map_err(StateError::backend)?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StateError::LockPoisoned)
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn get(&self, scope: CheckpointScope, object: &str) -> error::Result<Option<DateTime<Utc>>> {
        let mut client = self.lock_client()?;
        let row = client
            .query_opt(
                "SELECT last_backup_ts FROM archive_checkpoints \
                 WHERE scope = $1 AND object_name = $2",
                &[&scope.as_str(), &object],
            )
            .map_err(StateError::backend)?;
        Ok(row.map(|r| r.get(0)))
    }

    fn upsert(
        &self,
        scope: CheckpointScope,
        object: &str,
        ts: DateTime<Utc>,
    ) -> error::Result<UpsertOutcome> {
        let mut client = self.lock_client()?;
        let mut tx = client.transaction().map_err(StateError::backend)?;

        let existing: Option<DateTime<Utc>> = tx
            .query_opt(
                "SELECT last_backup_ts FROM archive_checkpoints \
                 WHERE scope = $1 AND object_name = $2 FOR UPDATE",
                &[&scope.as_str(), &object],
            )
            .map_err(StateError::backend)?
            .map(|r| r.get(0));

        let outcome = match existing {
            Some(stored) if stored >= ts => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Advanced,
            None => UpsertOutcome::Inserted,
        };

        if outcome != UpsertOutcome::Unchanged {
            tx.execute(
                "INSERT INTO archive_checkpoints (scope, object_name, last_backup_ts, updated_at) \
                 VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (scope, object_name) \
                 DO UPDATE SET last_backup_ts = EXCLUDED.last_backup_ts, updated_at = now() \
                 WHERE EXCLUDED.last_backup_ts > archive_checkpoints.last_backup_ts",
                &[&scope.as_str(), &object, &ts],
            )
            .map_err(StateError::backend)?;
        }

        tx.commit().map_err(StateError::backend)?;
        Ok(outcome)
    }

    fn list(&self) -> error::Result<Vec<Checkpoint>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT scope, object_name, last_backup_ts FROM archive_checkpoints \
                 ORDER BY scope, object_name",
                &[],
            )
            .map_err(StateError::backend)?;

        rows.iter()
            .map(|row| {
                let scope: String = row.get(0);
                Ok(Checkpoint {
                    scope: scope.parse().map_err(StateError::Corrupt)?,
                    object_name: row.get(1),
                    last_backup_ts: row.get(2),
                })
            })
            .collect()
    }
}
