//! Transfer engine: ships the local artifact tree to object storage.
//!
//! A sync is tree-level and idempotent, so a failed attempt is retried as a
//! whole.

pub mod remote;
pub mod retention;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use remote::RemoteStore;

/// Object storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Credentials, bucket or mount are not usable.
    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    /// The sync ran and failed.
    #[error("sync failed: {0}")]
    Sync(String),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one successful sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files uploaded because they were new or changed.
    pub files_transferred: u64,
    /// Files already present remotely with matching size and age.
    pub files_unchanged: u64,
}

/// Remote durable storage for the artifact tree.
///
/// `sync` must only upload new or changed files, skip `*.partial` files,
/// and be safe to call again after a failure.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Short human-readable name for logs.
    fn describe(&self) -> String;

    /// Verify the store is usable before any object is processed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PrerequisiteMissing`] when the remote cannot
    /// be reached.
    async fn preflight(&self) -> Result<(), StorageError>;

    /// Sync the tree under `local` into the store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the sync did not complete.
    async fn sync(&self, local: &Path) -> Result<SyncReport, StorageError>;
}

/// Retry settings: `1 + max_retries` attempts, fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

/// A sync that finally succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub attempts: u32,
    pub report: SyncReport,
}

/// Every attempt failed.
#[derive(Debug)]
pub struct TransferExhausted {
    pub attempts: u32,
    pub last_error: StorageError,
}

/// Sync `local` to `remote`, retrying up to `policy.max_retries` times.
///
/// # Errors
///
/// Returns [`TransferExhausted`] with the last error once every attempt failed.
pub async fn sync_with_retry(
    store: Arc<dyn ArtifactStore>,
    local: PathBuf,
    policy: RetryPolicy,
) -> Result<TransferOutcome, TransferExhausted> {
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match store.sync(&local).await {
            Ok(report) => {
                tracing::info!(
                    store = store.describe(),
                    attempt,
                    files = report.files_transferred,
                    unchanged = report.files_unchanged,
                    "Artifact tree synced"
                );
                return Ok(TransferOutcome {
                    attempts: attempt,
                    report,
                });
            }
            Err(err) if attempt < max_attempts => {
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = policy.backoff.as_millis() as u64;
                tracing::warn!(
                    store = store.describe(),
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "Sync failed, will retry"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => {
                tracing::error!(
                    store = store.describe(),
                    attempt,
                    max_retries = policy.max_retries,
                    error = %err,
                    "Max retries exhausted, sync failed"
                );
                return Err(TransferExhausted {
                    attempts: attempt,
                    last_error: err,
                });
            }
        }
    }
}
