pub mod check;
pub mod checkpoints;
pub mod plan;
pub mod run;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tablevault_engine::config::parser;
use tablevault_engine::config::types::ArchiveConfig;
use tablevault_engine::config::validator;
use tablevault_engine::resolve::resolve_context;
use tablevault_engine::{ArchiveContext, ArchiveError, CancellationToken};

/// Parse and validate an archive file.
pub fn load_config(config_path: &Path) -> Result<ArchiveConfig> {
    let config = parser::parse_archive(config_path)
        .with_context(|| format!("Failed to parse archive: {}", config_path.display()))?;
    validator::validate_archive(&config)?;
    Ok(config)
}

/// Resolve databases and stores off the async runtime.
pub async fn open_context(
    config: &ArchiveConfig,
    cancel: CancellationToken,
) -> Result<ArchiveContext, ArchiveError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || resolve_context(&config, cancel))
        .await
        .map_err(|e| ArchiveError::Infrastructure(anyhow!("resolve task failed: {e}")))?
}

pub async fn close_context(context: ArchiveContext) {
    // Postgres clients must be dropped off the async runtime.
    if let Err(e) = tokio::task::spawn_blocking(move || drop(context)).await {
        tracing::warn!(error = %e, "Failed to release connections");
    }
}
