//! Per-object failure taxonomy.
//!
//! Every variant here is recovered: the orchestrator records it against the
//! object and moves on. Run-level failures live in the engine crate.

/// Recovered failure attached to a single registry object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    /// Registry row with missing or malformed names.
    #[error("invalid registry row: {0}")]
    InvalidRegistryRow(String),

    /// Schema lookup failed; the object is treated as ineligible.
    #[error("schema introspection failed for '{table}': {message}")]
    SchemaIntrospectionFailed { table: String, message: String },

    /// Extraction failed; any partial artifact was removed.
    #[error("dump failed for '{table}': {message}")]
    DumpFailed { table: String, message: String },

    /// Source rows could not be deleted; the archive stands.
    #[error("delete failed for '{table}': {message}")]
    DeleteFailed { table: String, message: String },

    /// Destination apply failed; the artifact is retained.
    #[error("restore failed for '{table}': {message}")]
    RestoreFailed { table: String, message: String },

    /// Checkpoint could not be persisted; the next run re-archives the window.
    #[error("checkpoint update failed for '{table}': {message}")]
    CheckpointFailed { table: String, message: String },
}

impl ObjectError {
    /// Short machine-readable kind, used in summaries.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRegistryRow(_) => "invalid_registry_row",
            Self::SchemaIntrospectionFailed { .. } => "schema_introspection_failed",
            Self::DumpFailed { .. } => "dump_failed",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::RestoreFailed { .. } => "restore_failed",
            Self::CheckpointFailed { .. } => "checkpoint_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_table() {
        let err = ObjectError::DumpFailed {
            table: "orders".into(),
            message: "disk full".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"), "got: {msg}");
        assert!(msg.contains("disk full"), "got: {msg}");
        assert_eq!(err.kind(), "dump_failed");
    }

    #[test]
    fn invalid_row_kind() {
        let err = ObjectError::InvalidRegistryRow("empty table_name".into());
        assert_eq!(err.kind(), "invalid_registry_row");
    }
}
