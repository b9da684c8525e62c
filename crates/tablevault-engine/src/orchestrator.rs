//! Archive orchestrator: registry, per-object pipeline, checkpoints, transfer.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use tablevault_db::{DestinationDatabase, SourceDatabase};
use tablevault_state::CheckpointStore;
use tablevault_types::error::ObjectError;
use tablevault_types::registry::RegistryEntry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{advance_database, advance_table};
use crate::config::types::ArchiveConfig;
use crate::dump::DumpEngine;
use crate::errors::ArchiveError;
use crate::mutation::{delete_archived, restore_artifact};
use crate::planner::{resolve_run_plan, PlanDecision, RunPlan, WindowPlanner};
use crate::registry::{RegistryReader, RegistrySnapshot};
use crate::result::{ObjectOutcome, ObjectState, RunReport, RunSummary};
use crate::transfer::retention::remove_expired;
use crate::transfer::{sync_with_retry, ArtifactStore, RetryPolicy, StorageError};

/// Resolved collaborators for a run.
#[derive(Clone)]
pub struct ArchiveContext {
    pub source: Arc<dyn SourceDatabase>,
    pub destination: Option<Arc<dyn DestinationDatabase>>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub store: Option<Arc<dyn ArtifactStore>>,
    pub cancel: CancellationToken,
}

/// Runtime execution options (not part of the archive YAML config).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Never delete from the source, whatever the config says.
    pub force_dry_run: bool,
    /// Skip the object storage sync and retention cleanup.
    pub skip_upload: bool,
    /// Run reference time; defaults to the current time.
    pub now: Option<DateTime<Utc>>,
}

/// Planning result for one registry entry, as printed by `plan`.
#[derive(Debug, Clone)]
pub struct PlannedObject {
    pub entry: RegistryEntry,
    pub decision: Result<PlanDecision, ObjectError>,
}

/// Registry and window planning without side effects.
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    pub run: RunPlan,
    pub objects: Vec<PlannedObject>,
    pub rejected: Vec<ObjectError>,
}

/// Everything a worker needs to archive one object.
struct ObjectWorker {
    source: Arc<dyn SourceDatabase>,
    destination: Option<Arc<dyn DestinationDatabase>>,
    checkpoints: Arc<dyn CheckpointStore>,
    plan: RunPlan,
    dump: DumpEngine,
    dry_run: bool,
    keep_artifact: bool,
    cancel: CancellationToken,
}

impl ObjectWorker {
    /// Plan -> dump -> delete? -> checkpoint -> restore?.
    fn process(&self, entry: &RegistryEntry) -> ObjectOutcome {
        let table = entry.table_name.as_str();
        let mut outcome = ObjectOutcome::planned(table);

        let planner = WindowPlanner::new(&self.plan, &*self.source, &*self.checkpoints);
        let plan = match planner.plan(entry) {
            Ok(PlanDecision::Archive(plan)) => plan,
            Ok(PlanDecision::Skip(skip)) => {
                outcome.window = skip.window;
                tracing::info!(table, reason = %skip.reason, "Skipping object");
                if let Some(ts) = skip.checkpoint_to {
                    if let Err(e) = advance_table(&*self.checkpoints, table, ts) {
                        tracing::error!(table, error = %e, "Checkpoint update failed");
                        outcome.fail(e);
                        return outcome;
                    }
                }
                outcome.skip(skip.reason.as_str());
                return outcome;
            }
            Err(e) => {
                tracing::warn!(table, error = %e, "Object not eligible");
                outcome.fail(e);
                return outcome;
            }
        };
        outcome.window = plan.window;
        outcome.mode = Some(plan.mode);

        if self.cancel.is_cancelled() {
            outcome.skip("cancelled");
            return outcome;
        }

        let artifact = match self.dump.dump(&*self.source, &plan, &self.cancel) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                outcome.skip("no_rows_at_dump");
                return outcome;
            }
            Err(e) => {
                tracing::error!(table, error = %e, "Dump failed");
                outcome.fail(e);
                return outcome;
            }
        };
        outcome.rows_archived = artifact.row_count;
        outcome.artifact = Some(artifact.path.clone());
        outcome.advance(ObjectState::Dumped);

        if self.dry_run {
            tracing::debug!(table, "Dry run, source rows kept");
        } else {
            match delete_archived(&*self.source, &plan, &artifact) {
                Ok(0) => {}
                Ok(deleted) => {
                    outcome.rows_deleted = deleted;
                    outcome.advance(ObjectState::DeletedSource);
                }
                Err(e) => {
                    tracing::error!(table, error = %e, "Delete failed; archive stands");
                    outcome.fail(e);
                    return outcome;
                }
            }
        }

        if let Some(ts) = plan.checkpoint_to {
            if let Err(e) = advance_table(&*self.checkpoints, table, ts) {
                tracing::error!(table, error = %e, "Checkpoint update failed");
                outcome.fail(e);
                return outcome;
            }
        }

        if let Some(destination) = &self.destination {
            match restore_artifact(&**destination, &artifact, self.keep_artifact) {
                Ok(removed) => {
                    if removed {
                        outcome.artifact = None;
                    }
                    outcome.advance(ObjectState::Restored);
                }
                Err(e) => {
                    tracing::error!(table, error = %e, "Restore failed; artifact retained");
                    outcome.fail(e);
                    return outcome;
                }
            }
        }

        outcome.advance(ObjectState::Done);
        outcome
    }
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, ArchiveError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArchiveError::Infrastructure(anyhow!("{what} task failed: {e}")))
}

async fn read_registry(
    config: &ArchiveConfig,
    source: Arc<dyn SourceDatabase>,
) -> Result<RegistrySnapshot, ArchiveError> {
    let query = config.registry.query();
    blocking("registry", move || {
        RegistryReader::new(&*source, query).list_objects()
    })
    .await?
}

async fn preflight_store(store: &dyn ArtifactStore) -> Result<(), ArchiveError> {
    store.preflight().await.map_err(|e| match e {
        StorageError::PrerequisiteMissing(msg) => ArchiveError::PrerequisiteMissing(msg),
        other => ArchiveError::PrerequisiteMissing(other.to_string()),
    })
}

/// Plan every registry object without dumping, deleting or checkpointing.
///
/// # Errors
///
/// Returns [`ArchiveError::RegistryUnavailable`] if the registry cannot be
/// read, or [`ArchiveError::Infrastructure`] for malformed window settings.
pub async fn plan_archive(
    config: &ArchiveConfig,
    context: &ArchiveContext,
    now: Option<DateTime<Utc>>,
) -> Result<ArchivePlan, ArchiveError> {
    let run = resolve_run_plan(&config.window, now.unwrap_or_else(Utc::now))?;
    let snapshot = read_registry(config, Arc::clone(&context.source)).await?;

    let source = Arc::clone(&context.source);
    let checkpoints = Arc::clone(&context.checkpoints);
    let task_run = run.clone();
    let entries = snapshot.entries;
    let objects = blocking("plan", move || {
        let planner = WindowPlanner::new(&task_run, &*source, &*checkpoints);
        entries
            .into_iter()
            .map(|entry| PlannedObject {
                decision: planner.plan(&entry),
                entry,
            })
            .collect::<Vec<_>>()
    })
    .await?;

    Ok(ArchivePlan {
        run,
        objects,
        rejected: snapshot.rejected,
    })
}

/// Run one archive pass.
///
/// Per-object failures are recorded in the report and never stop the run.
///
/// # Errors
///
/// Returns [`ArchiveError`] for registry failure, missing prerequisites,
/// cancellation, transfer exhaustion, or infrastructure errors.
#[allow(clippy::too_many_lines)]
pub async fn run_archive(
    config: &ArchiveConfig,
    context: &ArchiveContext,
    options: &ExecutionOptions,
) -> Result<RunReport, ArchiveError> {
    let started = Instant::now();
    let run = resolve_run_plan(&config.window, options.now.unwrap_or_else(Utc::now))?;
    let dry_run = config.dry_run || options.force_dry_run;
    let dump_root = config.dump_root();

    tracing::info!(
        archive = config.archive,
        database = context.source.name(),
        mode = %run.mode,
        tag = run.tag,
        dry_run,
        "Starting archive run"
    );

    let upload = match (&config.storage, options.skip_upload) {
        (Some(storage), false) => {
            let store = context.store.clone().ok_or_else(|| {
                ArchiveError::Infrastructure(anyhow!("storage is configured but no object store was resolved"))
            })?;
            preflight_store(&*store).await?;
            Some((storage, store))
        }
        _ => None,
    };

    std::fs::create_dir_all(&dump_root)
        .with_context(|| format!("Failed to create dump root {}", dump_root.display()))?;

    let snapshot = read_registry(config, Arc::clone(&context.source)).await?;
    let rejected = snapshot.rejected;

    let worker = Arc::new(ObjectWorker {
        source: Arc::clone(&context.source),
        destination: context.destination.clone(),
        checkpoints: Arc::clone(&context.checkpoints),
        dump: DumpEngine::new(
            dump_root.clone(),
            context.source.name(),
            config.layout,
            run.tag.clone(),
        ),
        plan: run.clone(),
        dry_run,
        keep_artifact: config.restore.as_ref().is_some_and(|r| r.keep_artifact),
        cancel: context.cancel.clone(),
    });

    let parallelism = usize::try_from(config.resources.parallelism.max(1)).unwrap_or(1);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(parallelism));
    tracing::info!(
        objects = snapshot.entries.len(),
        parallelism,
        "Processing registry objects"
    );

    let mut join_set: JoinSet<(usize, ObjectOutcome)> = JoinSet::new();
    for (index, entry) in snapshot.entries.into_iter().enumerate() {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| ArchiveError::Infrastructure(anyhow!("Semaphore closed: {e}")))?;
        if context.cancel.is_cancelled() {
            tracing::warn!("Cancellation requested, not starting further objects");
            break;
        }
        let worker = Arc::clone(&worker);
        join_set.spawn_blocking(move || {
            let _permit = permit;
            (index, worker.process(&entry))
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(result) => outcomes.push(result),
            Err(join_err) => {
                return Err(ArchiveError::Infrastructure(anyhow!(
                    "Object task panicked: {join_err}"
                )));
            }
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<ObjectOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

    let mut summary = RunSummary {
        invalid_registry_rows: rejected.len() as u64,
        ..RunSummary::default()
    };
    for outcome in &outcomes {
        summary.absorb(outcome);
    }

    if context.cancel.is_cancelled() {
        summary.duration_secs = started.elapsed().as_secs_f64();
        tracing::warn!(
            processed = summary.objects_processed,
            "Archive run cancelled; skipping checkpoint finalization and transfer"
        );
        return Err(ArchiveError::Cancelled { summary });
    }

    if summary.has_dump_failures() {
        tracing::warn!(
            dumps_failed = summary.dumps_failed,
            "Dump failures present; database checkpoint left unchanged"
        );
    } else {
        let checkpoints = Arc::clone(&context.checkpoints);
        let database = context.source.name().to_string();
        let end = run.global_end();
        let result = blocking("checkpoint", move || {
            advance_database(&*checkpoints, &database, end)
        })
        .await?;
        if let Err(e) = result {
            tracing::error!(error = %e, "Database checkpoint update failed");
            summary.checkpoint_failures += 1;
        }
    }

    if let Some((storage, store)) = upload {
        let policy = RetryPolicy {
            max_retries: storage.max_retries,
            backoff: std::time::Duration::from_secs(storage.retry_backoff_secs),
        };
        let sync = sync_with_retry(store, dump_root.clone(), policy).await;
        match sync {
            Ok(outcome) => {
                summary.uploads_retried = u64::from(outcome.attempts.saturating_sub(1));
                summary.files_uploaded = outcome.report.files_transferred;
                if let Some(days) = storage.retention_days {
                    let root = dump_root.clone();
                    let report =
                        blocking("retention", move || remove_expired(&root, days, SystemTime::now()))
                            .await?;
                    summary.artifacts_expired = report.files_removed;
                }
            }
            Err(exhausted) => {
                summary.uploads_retried = u64::from(exhausted.attempts.saturating_sub(1));
                summary.duration_secs = started.elapsed().as_secs_f64();
                return Err(ArchiveError::TransferFailed {
                    attempts: exhausted.attempts,
                    message: exhausted.last_error.to_string(),
                    summary,
                });
            }
        }
    }

    summary.duration_secs = started.elapsed().as_secs_f64();
    tracing::info!(
        archive = config.archive,
        processed = summary.objects_processed,
        skipped = summary.objects_skipped,
        rows_archived = summary.rows_archived,
        rows_deleted = summary.rows_deleted,
        dumps_failed = summary.dumps_failed,
        deletes_failed = summary.deletes_failed,
        restores_failed = summary.restores_failed,
        duration_secs = summary.duration_secs,
        "Archive run complete"
    );

    Ok(RunReport {
        archive: config.archive.clone(),
        tag: run.tag,
        dry_run,
        summary,
        outcomes,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use chrono::TimeZone;
    use rusqlite::Connection;
    use tablevault_db::SqliteDatabase;
    use tablevault_state::SqliteCheckpointStore;
    use tablevault_types::checkpoint::CheckpointScope;
    use tempfile::tempdir;

    use crate::config::parser::parse_archive_str;
    use crate::transfer::testing::FlakyStore;

    fn context(store: Option<Arc<dyn ArtifactStore>>) -> ArchiveContext {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, created_at TEXT);
             INSERT INTO orders VALUES (1, '2023-01-03 00:00:00'), (2, '2023-01-04 00:00:00');
             CREATE TABLE archive_manager (table_name TEXT, key_column TEXT);
             INSERT INTO archive_manager VALUES ('orders', 'id'), ('', 'id');",
        )
        .unwrap();
        ArchiveContext {
            source: Arc::new(SqliteDatabase::from_connection(conn, "shop")),
            destination: None,
            checkpoints: Arc::new(SqliteCheckpointStore::in_memory().unwrap()),
            store,
            cancel: CancellationToken::new(),
        }
    }

    fn config(work: &std::path::Path, extra: &str) -> ArchiveConfig {
        parse_archive_str(&format!(
            "version: \"1.0\"\narchive: t\nsource:\n  driver: sqlite\n  path: unused.db\n\
             work_dir: {}\nwindow:\n  start: 2023-01-01\n  end: 2023-02-01\n{extra}",
            work.display()
        ))
        .unwrap()
    }

    fn options() -> ExecutionOptions {
        ExecutionOptions {
            now: Some(Utc.with_ymd_and_hms(2023, 2, 1, 12, 0, 0).unwrap()),
            ..ExecutionOptions::default()
        }
    }

    #[tokio::test]
    async fn archives_and_records_both_checkpoint_scopes() {
        let dir = tempdir().unwrap();
        let ctx = context(None);
        let report = run_archive(&config(dir.path(), ""), &ctx, &options()).await.unwrap();

        assert_eq!(report.summary.rows_archived, 2);
        assert_eq!(report.summary.invalid_registry_rows, 1);
        assert_eq!(report.tag, "2023-02-01");
        assert_eq!(report.outcomes[0].state, ObjectState::Done);
        let feb = Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(ctx.checkpoints.get(CheckpointScope::Table, "orders").unwrap(), Some(feb));
        assert_eq!(ctx.checkpoints.get(CheckpointScope::Database, "shop").unwrap(), Some(feb));
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing_and_skips_transfer() {
        let dir = tempdir().unwrap();
        let flaky = Arc::new(FlakyStore::new(0));
        let ctx = context(Some(flaky.clone()));
        ctx.cancel.cancel();
        let cfg = config(
            dir.path(),
            &format!("storage:\n  backend: local\n  path: {}\n", dir.path().join("remote").display()),
        );
        let err = run_archive(&cfg, &ctx, &options()).await.unwrap_err();
        assert_eq!(err.exit_code(), 130);
        assert_eq!(err.summary().map(|s| s.rows_archived), Some(0));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transfer_retries_then_succeeds() {
        let dir = tempdir().unwrap();
        let flaky = Arc::new(FlakyStore::new(1));
        let ctx = context(Some(flaky.clone()));
        let cfg = config(
            dir.path(),
            &format!(
                "storage:\n  backend: local\n  path: {}\n  retry_backoff_secs: 0\n",
                dir.path().join("remote").display()
            ),
        );
        let report = run_archive(&cfg, &ctx, &options()).await.unwrap();
        assert_eq!(report.summary.uploads_retried, 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skip_upload_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let flaky = Arc::new(FlakyStore::new(u32::MAX));
        let ctx = context(Some(flaky.clone()));
        let cfg = config(
            dir.path(),
            &format!("storage:\n  backend: local\n  path: {}\n", dir.path().join("remote").display()),
        );
        let opts = ExecutionOptions {
            skip_upload: true,
            ..options()
        };
        assert!(run_archive(&cfg, &ctx, &opts).await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plan_has_no_side_effects() {
        let dir = tempdir().unwrap();
        let ctx = context(None);
        let plan = plan_archive(&config(dir.path(), ""), &ctx, options().now).await.unwrap();
        assert_eq!(plan.objects.len(), 1);
        assert_eq!(plan.rejected.len(), 1);
        assert!(matches!(plan.objects[0].decision, Ok(PlanDecision::Archive(_))));
        assert!(ctx.checkpoints.list().unwrap().is_empty());
        assert!(!dir.path().join("dumps").exists());
    }
}
