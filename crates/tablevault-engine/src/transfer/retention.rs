//! Local retention cleanup after a successful sync.
//!
//! Failures are logged and counted, never returned.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

const SECONDS_PER_DAY: u64 = 86_400;

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub files_removed: u64,
    pub dirs_pruned: u64,
    pub errors: u64,
}

/// Remove `.sql` artifacts under `root` last modified more than
/// `retention_days` before `now`, then prune directories left empty.
/// `root` itself is kept.
pub fn remove_expired(root: &Path, retention_days: u32, now: SystemTime) -> RetentionReport {
    let mut report = RetentionReport::default();
    let max_age = Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY);
    let Some(cutoff) = now.checked_sub(max_age) else {
        return report;
    };
    if root.is_dir() {
        sweep(root, cutoff, &mut report);
    }
    tracing::info!(
        root = %root.display(),
        retention_days,
        removed = report.files_removed,
        pruned = report.dirs_pruned,
        errors = report.errors,
        "Retention cleanup finished"
    );
    report
}

// Children are yielded before their directory, so a directory emptied by
// this pass is seen empty when its own entry comes up.
fn sweep(root: &Path, cutoff: SystemTime, report: &mut RetentionReport) {
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot walk artifact tree");
                report.errors += 1;
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            match fs::read_dir(path).map(|mut children| children.next().is_none()) {
                Ok(false) => {}
                Ok(true) => match fs::remove_dir(path) {
                    Ok(()) => report.dirs_pruned += 1,
                    Err(e) => {
                        tracing::warn!(dir = %path.display(), error = %e, "Cannot prune directory");
                        report.errors += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(dir = %path.display(), error = %e, "Cannot list directory");
                    report.errors += 1;
                }
            }
            continue;
        }

        if !path.extension().is_some_and(|ext| ext == "sql") {
            continue;
        }
        let modified = match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Cannot read artifact age");
                report.errors += 1;
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(file = %path.display(), "Removed expired artifact");
                report.files_removed += 1;
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Cannot remove expired artifact");
                report.errors += 1;
            }
        }
    }
}
