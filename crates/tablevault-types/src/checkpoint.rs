//! Checkpoint model types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Granularity a checkpoint is recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointScope {
    /// Whole-run high-water mark for a source database.
    Database,
    /// Per-table high-water mark seeding incremental windows.
    Table,
}

impl CheckpointScope {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Table => "table",
        }
    }
}

impl std::fmt::Display for CheckpointScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(Self::Database),
            "table" => Ok(Self::Table),
            other => Err(format!("unknown checkpoint scope '{other}'")),
        }
    }
}

/// Durable last-archived timestamp for a `(scope, object)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub scope: CheckpointScope,
    pub object_name: String,
    pub last_backup_ts: DateTime<Utc>,
}

/// Effect of an upsert on the stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No checkpoint existed; one was created.
    Inserted,
    /// The stored checkpoint moved forward.
    Advanced,
    /// The stored checkpoint was equal or newer and stays as is.
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_str() {
        for scope in [CheckpointScope::Database, CheckpointScope::Table] {
            assert_eq!(scope.as_str().parse::<CheckpointScope>().unwrap(), scope);
        }
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let err = "schema".parse::<CheckpointScope>().unwrap_err();
        assert!(err.contains("schema"));
    }

    #[test]
    fn scope_serializes_snake_case() {
        let json = serde_json::to_string(&CheckpointScope::Table).unwrap();
        assert_eq!(json, "\"table\"");
    }
}
