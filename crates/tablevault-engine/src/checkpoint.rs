//! Checkpoint advancement after successful archive steps.

use chrono::{DateTime, Utc};
use tablevault_state::{CheckpointStore, StateError};
use tablevault_types::checkpoint::{CheckpointScope, UpsertOutcome};
use tablevault_types::error::ObjectError;

fn log_outcome(scope: CheckpointScope, object: &str, ts: DateTime<Utc>, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Inserted | UpsertOutcome::Advanced => tracing::info!(
            scope = %scope,
            object,
            checkpoint = %ts.to_rfc3339(),
            "Checkpoint advanced"
        ),
        UpsertOutcome::Unchanged => tracing::debug!(
            scope = %scope,
            object,
            checkpoint = %ts.to_rfc3339(),
            "Stored checkpoint already at or past this point"
        ),
    }
}

/// Record that `table` is archived up to `ts`.
///
/// # Errors
///
/// Returns [`ObjectError::CheckpointFailed`] when the store rejects the write.
pub(crate) fn advance_table(
    store: &dyn CheckpointStore,
    table: &str,
    ts: DateTime<Utc>,
) -> Result<UpsertOutcome, ObjectError> {
    let outcome = store
        .upsert(CheckpointScope::Table, table, ts)
        .map_err(|e| ObjectError::CheckpointFailed {
            table: table.to_string(),
            message: e.to_string(),
        })?;
    log_outcome(CheckpointScope::Table, table, ts, outcome);
    Ok(outcome)
}

/// Record the run-wide high-water mark for `database`.
pub(crate) fn advance_database(
    store: &dyn CheckpointStore,
    database: &str,
    ts: DateTime<Utc>,
) -> Result<UpsertOutcome, StateError> {
    let outcome = store.upsert(CheckpointScope::Database, database, ts)?;
    log_outcome(CheckpointScope::Database, database, ts, outcome);
    Ok(outcome)
}
