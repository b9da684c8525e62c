//! Run-level archive errors and their process exit codes.

use crate::result::RunSummary;

/// Exit code for configuration or infrastructure failures.
pub const EXIT_INFRASTRUCTURE: u8 = 1;
/// Exit code when the registry query cannot execute.
pub const EXIT_REGISTRY_UNAVAILABLE: u8 = 2;
/// Exit code when an external prerequisite is missing.
pub const EXIT_PREREQUISITE_MISSING: u8 = 3;
/// Exit code when object storage sync exhausted its retries.
pub const EXIT_TRANSFER_FAILED: u8 = 4;
/// Exit code after an interrupt.
pub const EXIT_CANCELLED: u8 = 130;

/// Failure that stops a run.
///
/// Per-object failures never surface here; they are recorded as
/// [`ObjectError`](tablevault_types::error::ObjectError)s in the run report.
/// Variants that occur after object processing carry the summary gathered
/// so far so the caller can still report it.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The registry query could not execute.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// A required external tool or service is missing.
    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    /// Object storage sync failed on every attempt.
    #[error("transfer failed after {attempts} attempt(s): {message}")]
    TransferFailed {
        attempts: u32,
        message: String,
        summary: RunSummary,
    },

    /// The run was interrupted before completion.
    #[error("archive run cancelled")]
    Cancelled { summary: RunSummary },

    /// Configuration, state backend, or other host-side failure.
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl ArchiveError {
    /// Process exit code for this failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::RegistryUnavailable(_) => EXIT_REGISTRY_UNAVAILABLE,
            Self::PrerequisiteMissing(_) => EXIT_PREREQUISITE_MISSING,
            Self::TransferFailed { .. } => EXIT_TRANSFER_FAILED,
            Self::Cancelled { .. } => EXIT_CANCELLED,
            Self::Infrastructure(_) => EXIT_INFRASTRUCTURE,
        }
    }

    /// Summary collected before the failure, when processing got that far.
    #[must_use]
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::TransferFailed { summary, .. } | Self::Cancelled { summary } => Some(summary),
            _ => None,
        }
    }
}
