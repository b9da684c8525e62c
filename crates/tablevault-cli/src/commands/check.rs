use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tablevault_engine::config::types::ArchiveConfig;
use tablevault_engine::registry::RegistryReader;
use tablevault_engine::transfer::StorageError;
use tablevault_engine::{ArchiveContext, ArchiveError, CancellationToken};

use super::{close_context, load_config, open_context};

/// Execute the `check` command: validate archive config and connectivity.
pub async fn execute(config_path: &Path) -> Result<()> {
    // 1. Parse and validate archive YAML
    let config = load_config(config_path)?;
    println!("Archive structure:   OK");

    // 2. Source, restore destination and state backend
    let context = match open_context(&config, CancellationToken::new()).await {
        Ok(context) => context,
        Err(err) => {
            println!("Connections:         FAILED");
            println!("  {err}");
            return Err(err.into());
        }
    };
    println!("Source database:     OK ({})", context.source.name());
    println!("State backend:       OK ({:?})", config.state.backend);
    if context.destination.is_some() {
        println!("Restore destination: OK");
    }

    // 3. Registry and object storage
    let result = check_remote(&config, &context).await;
    close_context(context).await;
    result?;

    println!("\nAll checks passed.");
    Ok(())
}

async fn check_remote(config: &ArchiveConfig, context: &ArchiveContext) -> Result<(), ArchiveError> {
    let source = Arc::clone(&context.source);
    let query = config.registry.query();
    let snapshot = tokio::task::spawn_blocking(move || {
        RegistryReader::new(&*source, query).list_objects()
    })
    .await
    .map_err(|e| ArchiveError::Infrastructure(anyhow!("registry task failed: {e}")))?;
    match snapshot {
        Ok(snapshot) => println!(
            "Registry:            OK ({} object(s), {} rejected)",
            snapshot.entries.len(),
            snapshot.rejected.len()
        ),
        Err(err) => {
            println!("Registry:            FAILED");
            println!("  {err}");
            return Err(err);
        }
    }

    if let Some(store) = &context.store {
        match store.preflight().await {
            Ok(()) => println!("Object storage:      OK ({})", store.describe()),
            Err(err) => {
                println!("Object storage:      FAILED");
                println!("  {err}");
                return Err(match err {
                    StorageError::PrerequisiteMissing(msg) => ArchiveError::PrerequisiteMissing(msg),
                    other => ArchiveError::PrerequisiteMissing(other.to_string()),
                });
            }
        }
    }
    Ok(())
}
