use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tablevault_engine::resolve::create_checkpoint_store;

use super::load_config;

/// Execute the `checkpoints` command: list every stored checkpoint.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    // The store may hold a Postgres client, so open, read and drop it off the runtime.
    let checkpoints = tokio::task::spawn_blocking(move || -> Result<_> {
        let store = create_checkpoint_store(&config)?;
        store.list().context("Failed to list checkpoints")
    })
    .await
    .map_err(|e| anyhow!("checkpoint task failed: {e}"))??;

    if checkpoints.is_empty() {
        println!("No checkpoints recorded.");
    } else {
        println!("{:<10} {:<32} LAST ARCHIVED", "SCOPE", "OBJECT");
        for checkpoint in &checkpoints {
            println!(
                "{:<10} {:<32} {}",
                checkpoint.scope.as_str(),
                checkpoint.object_name,
                checkpoint.last_backup_ts.to_rfc3339()
            );
        }
    }

    let json = serde_json::to_string(&checkpoints)?;
    println!("@@CHECKPOINTS_JSON@@{json}");

    Ok(())
}
