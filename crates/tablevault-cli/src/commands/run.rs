use std::path::Path;

use anyhow::Result;
use tablevault_engine::{run_archive, CancellationToken, ExecutionOptions, RunReport, RunSummary};

use super::{close_context, load_config, open_context};

/// Execute the `run` command: parse, validate, and run an archive job.
pub async fn execute(config_path: &Path, dry_run: bool, no_upload: bool) -> Result<()> {
    // 1. Parse and validate archive YAML
    let config = load_config(config_path)?;

    tracing::info!(
        archive = config.archive,
        mode = %config.window.mode,
        dry_run = config.dry_run || dry_run,
        upload = config.storage.is_some() && !no_upload,
        "Archive validated"
    );

    // 2. Resolve connections
    let cancel = CancellationToken::new();
    let context = open_context(&config, cancel.clone()).await?;

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight objects");
            signal_token.cancel();
        }
    });

    // 3. Run
    let options = ExecutionOptions {
        force_dry_run: dry_run,
        skip_upload: no_upload,
        now: None,
    };
    let result = run_archive(&config, &context, &options).await;
    close_context(context).await;

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(err) => {
            if let Some(summary) = err.summary() {
                print_summary(summary);
                print_json(&config.archive, None, None, summary, &[]);
            }
            Err(err.into())
        }
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Archive '{}' completed (tag {}{}).",
        report.archive,
        report.tag,
        if report.dry_run { ", dry run" } else { "" }
    );
    print_summary(&report.summary);

    if !report.outcomes.is_empty() {
        println!("  Objects:");
        for outcome in &report.outcomes {
            let detail = match (&outcome.error, &outcome.skip_reason) {
                (Some(err), _) => err.to_string(),
                (None, Some(reason)) => reason.clone(),
                (None, None) => format!(
                    "{} row(s) archived, {} deleted",
                    outcome.rows_archived, outcome.rows_deleted
                ),
            };
            println!(
                "    {:<24} {:<16} {}",
                outcome.table,
                outcome.state.as_str(),
                detail
            );
        }
    }
    for rejected in &report.rejected {
        println!("  Rejected: {rejected}");
    }

    let objects: Vec<serde_json::Value> = report
        .outcomes
        .iter()
        .map(|o| {
            serde_json::json!({
                "table": o.table,
                "state": o.state,
                "mode": o.mode.map(|m| m.to_string()),
                "window": o.window.map(|w| w.to_string()),
                "rows_archived": o.rows_archived,
                "rows_deleted": o.rows_deleted,
                "artifact": o.artifact.as_ref().map(|p| p.display().to_string()),
                "skip_reason": o.skip_reason,
                "error": o.error.as_ref().map(ToString::to_string),
            })
        })
        .collect();
    print_json(
        &report.archive,
        Some(report.tag.as_str()),
        Some(report.dry_run),
        &report.summary,
        &objects,
    );
}

fn print_summary(summary: &RunSummary) {
    println!("  Objects processed: {}", summary.objects_processed);
    println!("  Objects skipped:   {}", summary.objects_skipped);
    println!("  Rows archived:     {}", summary.rows_archived);
    println!("  Rows deleted:      {}", summary.rows_deleted);
    if summary.dumps_failed + summary.deletes_failed + summary.restores_failed > 0 {
        println!(
            "  Failures:          {} dump, {} delete, {} restore",
            summary.dumps_failed, summary.deletes_failed, summary.restores_failed
        );
    }
    if summary.restores_succeeded > 0 {
        println!("  Restored:          {}", summary.restores_succeeded);
    }
    if summary.checkpoint_failures > 0 {
        println!("  Checkpoint errors: {}", summary.checkpoint_failures);
    }
    if summary.invalid_registry_rows + summary.schema_failures > 0 {
        println!(
            "  Ineligible:        {} registry row(s), {} schema failure(s)",
            summary.invalid_registry_rows, summary.schema_failures
        );
    }
    if summary.files_uploaded > 0 || summary.uploads_retried > 0 {
        println!("  Files uploaded:    {}", summary.files_uploaded);
    }
    if summary.uploads_retried > 0 {
        println!("  Upload retries:    {}", summary.uploads_retried);
    }
    if summary.artifacts_expired > 0 {
        println!("  Expired locally:   {}", summary.artifacts_expired);
    }
    println!("  Duration:          {:.2}s", summary.duration_secs);
}

// Machine-readable JSON for schedulers and wrappers
fn print_json(
    archive: &str,
    tag: Option<&str>,
    dry_run: Option<bool>,
    summary: &RunSummary,
    objects: &[serde_json::Value],
) {
    let json = serde_json::json!({
        "archive": archive,
        "tag": tag,
        "dry_run": dry_run,
        "summary": summary,
        "objects": objects,
    });
    println!("@@SUMMARY_JSON@@{json}");
}
