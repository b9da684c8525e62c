//! Builds databases, checkpoint store and object store from configuration.
//!
//! Everything here performs blocking I/O (the `postgres` client runs its own
//! runtime), so call it from a blocking context.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tablevault_db::{
    DestinationDatabase, PostgresDatabase, SourceDatabase, SqliteDatabase,
};
use tablevault_state::{CheckpointStore, PostgresCheckpointStore, SqliteCheckpointStore};
use tokio_util::sync::CancellationToken;

use crate::config::types::{
    ArchiveConfig, DatabaseConfig, StateBackendKind, StorageBackendKind, StorageConfig,
};
use crate::errors::ArchiveError;
use crate::orchestrator::ArchiveContext;
use crate::transfer::{ArtifactStore, RemoteStore};

/// Connect to the source database and confirm it answers.
///
/// # Errors
///
/// Returns [`ArchiveError::RegistryUnavailable`]: without the source there
/// is no registry to read.
pub fn open_source(config: &DatabaseConfig) -> Result<Arc<dyn SourceDatabase>, ArchiveError> {
    let source: Arc<dyn SourceDatabase> = match config {
        DatabaseConfig::Postgres(pg) => Arc::new(
            PostgresDatabase::connect(&pg.to_connection())
                .map_err(|e| ArchiveError::RegistryUnavailable(format!("source: {e}")))?,
        ),
        DatabaseConfig::Sqlite(sqlite) => {
            if !sqlite.path.exists() {
                return Err(ArchiveError::RegistryUnavailable(format!(
                    "source database {} does not exist",
                    sqlite.path.display()
                )));
            }
            Arc::new(
                SqliteDatabase::open(&sqlite.path)
                    .map_err(|e| ArchiveError::RegistryUnavailable(format!("source: {e}")))?,
            )
        }
    };
    source
        .ping()
        .map_err(|e| ArchiveError::RegistryUnavailable(format!("source: {e}")))?;
    tracing::debug!(database = source.name(), "Source database reachable");
    Ok(source)
}

/// Connect to the restore destination and confirm it answers.
///
/// # Errors
///
/// Returns [`ArchiveError::PrerequisiteMissing`] if it cannot be reached.
pub fn open_destination(
    config: &DatabaseConfig,
) -> Result<Arc<dyn DestinationDatabase>, ArchiveError> {
    let missing = |e: tablevault_db::DatabaseError| {
        ArchiveError::PrerequisiteMissing(format!("restore destination: {e}"))
    };
    let destination: Arc<dyn DestinationDatabase> = match config {
        DatabaseConfig::Postgres(pg) => {
            Arc::new(PostgresDatabase::connect(&pg.to_connection()).map_err(missing)?)
        }
        DatabaseConfig::Sqlite(sqlite) => Arc::new(SqliteDatabase::open(&sqlite.path).map_err(missing)?),
    };
    destination.ping().map_err(missing)?;
    Ok(destination)
}

/// Default `SQLite` checkpoint database location.
#[must_use]
pub fn default_state_path(config: &ArchiveConfig) -> PathBuf {
    config.work_dir.join("state.db")
}

/// Open the configured checkpoint store.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or is misconfigured.
pub fn create_checkpoint_store(config: &ArchiveConfig) -> Result<Arc<dyn CheckpointStore>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let path = config
                .state
                .connection
                .as_ref()
                .map_or_else(|| default_state_path(config), PathBuf::from);
            let store = SqliteCheckpointStore::open(&path).with_context(|| {
                format!("Failed to open SQLite checkpoint store at {}", path.display())
            })?;
            tracing::debug!(path = %path.display(), "Opened SQLite checkpoint store");
            Ok(Arc::new(store))
        }
        StateBackendKind::Postgres => {
            let connstr = config.state.connection.as_deref().context(
                "state.connection is required for the postgres checkpoint backend",
            )?;
            let store = PostgresCheckpointStore::open(connstr)
                .context("Failed to open PostgreSQL checkpoint store")?;
            Ok(Arc::new(store))
        }
    }
}

/// Artifact store for the configured backend.
///
/// # Errors
///
/// Returns [`ArchiveError::PrerequisiteMissing`] if the backend settings are
/// incomplete or the client cannot be built.
pub fn create_artifact_store(
    storage: &StorageConfig,
) -> Result<Arc<dyn ArtifactStore>, ArchiveError> {
    let uri = storage.remote_uri();
    let store = match storage.backend {
        StorageBackendKind::S3 => {
            let bucket = storage.bucket.as_deref().ok_or_else(|| {
                ArchiveError::PrerequisiteMissing("storage.bucket is required for s3".into())
            })?;
            RemoteStore::s3(
                bucket,
                &storage.prefix,
                storage.region.as_deref(),
                &storage.storage_class,
                uri,
            )
        }
        StorageBackendKind::Local => {
            let root = storage.path.as_deref().ok_or_else(|| {
                ArchiveError::PrerequisiteMissing("storage.path is required for local".into())
            })?;
            RemoteStore::local(root, &storage.prefix, uri)
        }
    }
    .map_err(|e| ArchiveError::PrerequisiteMissing(e.to_string()))?;
    tracing::debug!(store = store.describe(), "Artifact store ready");
    Ok(Arc::new(store))
}

/// Resolve everything a run needs.
///
/// # Errors
///
/// Returns [`ArchiveError::RegistryUnavailable`] when the source cannot be
/// reached, [`ArchiveError::PrerequisiteMissing`] when the restore
/// destination cannot, and [`ArchiveError::Infrastructure`] for state
/// backend failures.
pub fn resolve_context(
    config: &ArchiveConfig,
    cancel: CancellationToken,
) -> Result<ArchiveContext, ArchiveError> {
    let source = open_source(&config.source)?;
    let destination = config
        .restore
        .as_ref()
        .map(|restore| open_destination(&restore.destination))
        .transpose()?;
    let checkpoints = create_checkpoint_store(config)?;
    let store = config.storage.as_ref().map(create_artifact_store).transpose()?;

    Ok(ArchiveContext {
        source,
        destination,
        checkpoints,
        store,
        cancel,
    })
}
