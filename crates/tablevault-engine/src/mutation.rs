//! Source deletion and destination restore for written artifacts.

use std::fs;

use tablevault_db::{DestinationDatabase, SourceDatabase};
use tablevault_types::artifact::DumpArtifact;
use tablevault_types::error::ObjectError;

use crate::planner::ObjectPlan;

/// Delete the rows `artifact` archived from the source.
///
/// Runs only against a confirmed, non-empty artifact, under the same
/// predicate the dump used. The delete commits only if it removes exactly
/// `artifact.row_count` rows. Returns the number of rows deleted; whole-table
/// dumps never delete and return `Ok(0)`.
///
/// # Errors
///
/// Returns [`ObjectError::DeleteFailed`] if the artifact cannot be
/// confirmed, the delete fails, or the deleted count differs.
pub fn delete_archived(
    source: &dyn SourceDatabase,
    plan: &ObjectPlan,
    artifact: &DumpArtifact,
) -> Result<u64, ObjectError> {
    let table = plan.entry.table_name.as_str();
    let failed = |message: String| ObjectError::DeleteFailed {
        table: table.to_string(),
        message,
    };

    if plan.window.is_none() {
        tracing::info!(table, "Whole-table dump; source rows are left in place");
        return Ok(0);
    }

    let size = fs::metadata(&artifact.path)
        .map_err(|e| failed(format!("cannot confirm artifact {}: {e}", artifact.path.display())))?
        .len();
    if size == 0 || artifact.row_count == 0 {
        return Err(failed(format!(
            "artifact {} is empty; refusing to delete",
            artifact.path.display()
        )));
    }

    let deleted = source
        .delete_rows(table, &plan.filter, artifact.row_count)
        .map_err(|e| failed(e.to_string()))?;
    tracing::info!(table, rows = deleted, filter = %plan.filter, "Deleted archived rows from source");
    Ok(deleted)
}

/// Apply `artifact` to the destination in one transaction.
///
/// On success the local file is removed unless `keep_artifact`; returns
/// whether it was removed. On failure the file is left in place.
///
/// # Errors
///
/// Returns [`ObjectError::RestoreFailed`] if the artifact cannot be read or
/// the destination rejects it.
pub fn restore_artifact(
    destination: &dyn DestinationDatabase,
    artifact: &DumpArtifact,
    keep_artifact: bool,
) -> Result<bool, ObjectError> {
    let failed = |message: String| ObjectError::RestoreFailed {
        table: artifact.object.clone(),
        message,
    };

    let script = fs::read_to_string(&artifact.path)
        .map_err(|e| failed(format!("reading {}: {e}", artifact.path.display())))?;
    destination
        .apply_script(&script)
        .map_err(|e| failed(e.to_string()))?;
    tracing::info!(
        table = artifact.object,
        rows = artifact.row_count,
        "Restored artifact into destination"
    );

    if keep_artifact {
        return Ok(false);
    }
    match fs::remove_file(&artifact.path) {
        Ok(()) => {
            tracing::debug!(path = %artifact.path.display(), "Removed restored artifact");
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(
                path = %artifact.path.display(),
                error = %e,
                "Restored artifact could not be removed"
            );
            Ok(false)
        }
    }
}
