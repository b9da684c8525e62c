//! Per-object outcomes and run-level summary counters.

use std::path::PathBuf;

use serde::Serialize;
use tablevault_types::artifact::DumpMode;
use tablevault_types::error::ObjectError;
use tablevault_types::window::ArchiveWindow;

/// Lifecycle of one registry object within a run.
///
/// `Planned -> Dumped -> [DeletedSource] -> [Restored] -> Done`. The failure
/// states and `Skipped` are terminal and never block the next object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Planned,
    Dumped,
    DeletedSource,
    Restored,
    Done,
    Skipped,
    DumpFailed,
    DeleteFailed,
    RestoreFailed,
    CheckpointFailed,
}

impl ObjectState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done
                | Self::Skipped
                | Self::DumpFailed
                | Self::DeleteFailed
                | Self::RestoreFailed
                | Self::CheckpointFailed
        )
    }

    /// Whether `self -> next` is a legal step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ObjectState::{
            CheckpointFailed, DeleteFailed, DeletedSource, Done, DumpFailed, Dumped, Planned,
            RestoreFailed, Restored, Skipped,
        };
        matches!(
            (self, next),
            (Planned, Dumped | Skipped | DumpFailed | CheckpointFailed)
                | (
                    Dumped,
                    DeletedSource | Restored | Done | DeleteFailed | RestoreFailed | CheckpointFailed
                )
                | (DeletedSource, Restored | Done | RestoreFailed | CheckpointFailed)
                | (Restored, Done)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Dumped => "dumped",
            Self::DeletedSource => "deleted_source",
            Self::Restored => "restored",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::DumpFailed => "dump_failed",
            Self::DeleteFailed => "delete_failed",
            Self::RestoreFailed => "restore_failed",
            Self::CheckpointFailed => "checkpoint_failed",
        }
    }
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one registry object.
#[derive(Debug, Clone)]
pub struct ObjectOutcome {
    pub table: String,
    pub state: ObjectState,
    /// Every state entered, starting with `Planned`.
    pub history: Vec<ObjectState>,
    pub window: Option<ArchiveWindow>,
    pub mode: Option<DumpMode>,
    pub rows_archived: u64,
    pub rows_deleted: u64,
    /// Artifact left on disk, if any.
    pub artifact: Option<PathBuf>,
    pub error: Option<ObjectError>,
    pub skip_reason: Option<String>,
}

impl ObjectOutcome {
    #[must_use]
    pub fn planned(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: ObjectState::Planned,
            history: vec![ObjectState::Planned],
            window: None,
            mode: None,
            rows_archived: 0,
            rows_deleted: 0,
            artifact: None,
            error: None,
            skip_reason: None,
        }
    }

    /// Move to `next`. Illegal steps are ignored and logged.
    pub fn advance(&mut self, next: ObjectState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                table = self.table,
                from = %self.state,
                to = %next,
                "Ignoring illegal object state transition"
            );
            return;
        }
        self.state = next;
        self.history.push(next);
    }

    /// Record a skip with its reason.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip_reason = Some(reason.into());
        self.advance(ObjectState::Skipped);
    }

    /// Record a recovered failure and enter the matching terminal state.
    pub fn fail(&mut self, error: ObjectError) {
        let next = match &error {
            ObjectError::DumpFailed { .. } => ObjectState::DumpFailed,
            ObjectError::DeleteFailed { .. } => ObjectState::DeleteFailed,
            ObjectError::RestoreFailed { .. } => ObjectState::RestoreFailed,
            ObjectError::CheckpointFailed { .. } => ObjectState::CheckpointFailed,
            ObjectError::InvalidRegistryRow(_) | ObjectError::SchemaIntrospectionFailed { .. } => {
                ObjectState::Skipped
            }
        };
        if next == ObjectState::Skipped {
            self.skip_reason = Some(error.kind().to_string());
        }
        self.error = Some(error);
        self.advance(next);
    }

    /// Whether the object passed through `state` during the run.
    #[must_use]
    pub fn visited(&self, state: ObjectState) -> bool {
        self.history.contains(&state)
    }
}

/// Aggregate counters for a run. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub objects_processed: u64,
    pub objects_skipped: u64,
    pub rows_archived: u64,
    pub rows_deleted: u64,
    pub dumps_failed: u64,
    pub deletes_failed: u64,
    pub restores_failed: u64,
    pub restores_succeeded: u64,
    pub checkpoint_failures: u64,
    pub invalid_registry_rows: u64,
    pub schema_failures: u64,
    pub uploads_retried: u64,
    pub files_uploaded: u64,
    pub artifacts_expired: u64,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Fold one object's outcome into the counters.
    pub fn absorb(&mut self, outcome: &ObjectOutcome) {
        match outcome.state {
            ObjectState::Skipped => {
                self.objects_skipped += 1;
                if matches!(
                    outcome.error,
                    Some(ObjectError::SchemaIntrospectionFailed { .. })
                ) {
                    self.schema_failures += 1;
                }
            }
            ObjectState::DumpFailed => {
                self.objects_processed += 1;
                self.dumps_failed += 1;
            }
            ObjectState::DeleteFailed => {
                self.objects_processed += 1;
                self.deletes_failed += 1;
            }
            ObjectState::RestoreFailed => {
                self.objects_processed += 1;
                self.restores_failed += 1;
            }
            ObjectState::CheckpointFailed => {
                self.objects_processed += 1;
                self.checkpoint_failures += 1;
            }
            _ => self.objects_processed += 1,
        }
        if outcome.visited(ObjectState::Restored) {
            self.restores_succeeded += 1;
        }
        self.rows_archived += outcome.rows_archived;
        self.rows_deleted += outcome.rows_deleted;
    }

    /// Whether any object counted as a dump failure.
    #[must_use]
    pub fn has_dump_failures(&self) -> bool {
        self.dumps_failed > 0
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub archive: String,
    pub tag: String,
    pub dry_run: bool,
    pub summary: RunSummary,
    pub outcomes: Vec<ObjectOutcome>,
    /// Registry rows rejected before planning.
    pub rejected: Vec<ObjectError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut o = ObjectOutcome::planned("orders");
        o.advance(ObjectState::Dumped);
        o.advance(ObjectState::DeletedSource);
        o.advance(ObjectState::Restored);
        o.advance(ObjectState::Done);
        assert_eq!(o.state, ObjectState::Done);
        assert_eq!(
            o.history,
            vec![
                ObjectState::Planned,
                ObjectState::Dumped,
                ObjectState::DeletedSource,
                ObjectState::Restored,
                ObjectState::Done
            ]
        );
    }

    #[test]
    fn terminal_states_do_not_move() {
        for terminal in [
            ObjectState::Done,
            ObjectState::Skipped,
            ObjectState::DumpFailed,
            ObjectState::DeleteFailed,
            ObjectState::RestoreFailed,
            ObjectState::CheckpointFailed,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ObjectState::Dumped));
            assert!(!terminal.can_transition_to(ObjectState::Done));
        }
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let mut o = ObjectOutcome::planned("orders");
        o.advance(ObjectState::Restored);
        assert_eq!(o.state, ObjectState::Planned);
        assert_eq!(o.history.len(), 1);
    }

    #[test]
    fn fail_maps_error_to_state() {
        let mut o = ObjectOutcome::planned("orders");
        o.advance(ObjectState::Dumped);
        o.fail(ObjectError::DeleteFailed {
            table: "orders".into(),
            message: "locked".into(),
        });
        assert_eq!(o.state, ObjectState::DeleteFailed);
        assert!(o.error.is_some());
    }

    #[test]
    fn summary_counts_each_terminal_kind() {
        let mut summary = RunSummary::default();

        let mut done = ObjectOutcome::planned("a");
        done.rows_archived = 5;
        done.rows_deleted = 5;
        done.advance(ObjectState::Dumped);
        done.advance(ObjectState::DeletedSource);
        done.advance(ObjectState::Restored);
        done.advance(ObjectState::Done);
        summary.absorb(&done);

        let mut skipped = ObjectOutcome::planned("b");
        skipped.skip("view");
        summary.absorb(&skipped);

        let mut failed = ObjectOutcome::planned("c");
        failed.fail(ObjectError::DumpFailed {
            table: "c".into(),
            message: "boom".into(),
        });
        summary.absorb(&failed);

        let mut schema = ObjectOutcome::planned("d");
        schema.fail(ObjectError::SchemaIntrospectionFailed {
            table: "d".into(),
            message: "denied".into(),
        });
        summary.absorb(&schema);

        assert_eq!(summary.objects_processed, 2);
        assert_eq!(summary.objects_skipped, 2);
        assert_eq!(summary.rows_archived, 5);
        assert_eq!(summary.rows_deleted, 5);
        assert_eq!(summary.dumps_failed, 1);
        assert_eq!(summary.restores_succeeded, 1);
        assert_eq!(summary.schema_failures, 1);
        assert!(summary.has_dump_failures());
    }

    #[test]
    fn summary_serializes_counters() {
        let json = serde_json::to_value(RunSummary::default()).unwrap();
        assert_eq!(json["rows_archived"], 0);
        assert_eq!(json["uploads_retried"], 0);
    }
}
