//! Checkpoint store trait definition.

use chrono::{DateTime, Utc};
use tablevault_types::checkpoint::{Checkpoint, CheckpointScope, UpsertOutcome};

use crate::error;

/// Storage contract for archive checkpoints.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn CheckpointStore>`.
/// Writes for one key are serialized by the implementation.
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint for a `(scope, object)` pair.
    ///
    /// Returns `Ok(None)` when nothing has been archived for it yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get(&self, scope: CheckpointScope, object: &str) -> error::Result<Option<DateTime<Utc>>>;

    /// Move the checkpoint for a `(scope, object)` pair forward to `ts`.
    ///
    /// A `ts` that is not newer than the stored value leaves it untouched
    /// and reports [`UpsertOutcome::Unchanged`], so replays are safe.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn upsert(
        &self,
        scope: CheckpointScope,
        object: &str,
        ts: DateTime<Utc>,
    ) -> error::Result<UpsertOutcome>;

    /// All stored checkpoints, ordered by scope then object name.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list(&self) -> error::Result<Vec<Checkpoint>>;
}
