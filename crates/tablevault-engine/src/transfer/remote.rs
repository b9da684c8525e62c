//! Artifact store on top of `object_store`: S3 buckets and local directories.
//!
//! A sync lists the remote prefix once and uploads every local file that
//! is missing there, differs in size, or was modified after the remote copy.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderName, HeaderValue};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectMeta, ObjectStore};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::{ArtifactStore, StorageError, SyncReport};
use crate::dump::PARTIAL_SUFFIX;

const UPLOAD_CONCURRENCY: usize = 4;

const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";

/// A file under the local artifact root.
#[derive(Debug, Clone)]
struct LocalFile {
    path: PathBuf,
    relative: PathBuf,
    size: u64,
    modified: DateTime<Utc>,
}

/// Headers that make S3 store uploads in `storage_class`.
fn storage_class_headers(storage_class: &str) -> Result<HeaderMap, StorageError> {
    let mut headers = HeaderMap::new();
    if storage_class.is_empty() {
        return Ok(headers);
    }
    let value = HeaderValue::from_str(storage_class).map_err(|e| {
        StorageError::PrerequisiteMissing(format!("invalid storage class '{storage_class}': {e}"))
    })?;
    headers.insert(HeaderName::from_static(STORAGE_CLASS_HEADER), value);
    Ok(headers)
}

fn local_files(root: &Path) -> Result<Vec<LocalFile>, StorageError> {
    if !root.is_dir() {
        return Err(StorageError::Sync(format!(
            "local artifact root {} is not a directory",
            root.display()
        )));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file()
            || entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX)
        {
            continue;
        }
        let meta = entry.metadata().map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| StorageError::Sync(format!("{}: {e}", entry.path().display())))?
            .to_path_buf();
        files.push(LocalFile {
            size: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
            relative,
            path: entry.into_path(),
        });
    }
    Ok(files)
}

fn needs_upload(file: &LocalFile, remote: Option<&ObjectMeta>) -> bool {
    remote.map_or(true, |meta| {
        u64::try_from(meta.size).unwrap_or(u64::MAX) != file.size || file.modified > meta.last_modified
    })
}

/// Syncs the artifact tree into an `object_store` backend under a key prefix.
pub struct RemoteStore {
    listing: Arc<dyn ObjectStore>,
    uploads: Arc<dyn ObjectStore>,
    prefix: Vec<String>,
    uri: String,
}

impl RemoteStore {
    /// Wrap an existing store; `prefix` is split on `/`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, uri: impl Into<String>) -> Self {
        Self {
            listing: Arc::clone(&store),
            uploads: store,
            prefix: prefix
                .split('/')
                .filter(|part| !part.is_empty())
                .map(String::from)
                .collect(),
            uri: uri.into(),
        }
    }

    /// S3 bucket configured from the standard `AWS_*` environment.
    ///
    /// Uploads carry `storage_class`; listing requests do not.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PrerequisiteMissing`] if the client cannot be built.
    pub fn s3(
        bucket: &str,
        prefix: &str,
        region: Option<&str>,
        storage_class: &str,
        uri: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        let unavailable =
            |e: object_store::Error| StorageError::PrerequisiteMissing(format!("s3 bucket {bucket}: {e}"));
        let listing = builder.clone().build().map_err(unavailable)?;
        let uploads = builder
            .with_client_options(
                ClientOptions::new().with_default_headers(storage_class_headers(storage_class)?),
            )
            .build()
            .map_err(unavailable)?;

        let mut store = Self::new(Arc::new(listing), prefix, uri);
        store.uploads = Arc::new(uploads);
        Ok(store)
    }

    /// Directory target, e.g. an NFS mount. Created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be created or opened.
    pub fn local(root: &Path, prefix: &str, uri: impl Into<String>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root.join(prefix.trim_matches('/')))?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store), prefix, uri))
    }

    fn prefix_path(&self) -> Option<ObjectPath> {
        if self.prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from_iter(self.prefix.iter().map(String::as_str)))
        }
    }

    fn key(&self, relative: &Path) -> Result<ObjectPath, StorageError> {
        let mut parts: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_str().ok_or_else(|| {
                    StorageError::Sync(format!("non UTF-8 artifact path {}", relative.display()))
                })?);
            }
        }
        Ok(ObjectPath::from_iter(parts))
    }

    async fn upload(&self, file: LocalFile, key: ObjectPath) -> Result<(), StorageError> {
        let mut reader = tokio::fs::File::open(&file.path).await?;
        let mut writer = BufWriter::new(Arc::clone(&self.uploads), key.clone());
        if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
            if let Err(abort) = writer.abort().await {
                tracing::warn!(key = %key, error = %abort, "Failed to abort partial upload");
            }
            return Err(e.into());
        }
        writer.shutdown().await?;
        tracing::debug!(key = %key, bytes = file.size, "Uploaded artifact");
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for RemoteStore {
    fn describe(&self) -> String {
        self.uri.clone()
    }

    async fn preflight(&self) -> Result<(), StorageError> {
        self.listing
            .list_with_delimiter(self.prefix_path().as_ref())
            .await
            .map_err(|e| StorageError::PrerequisiteMissing(format!("{} is not reachable: {e}", self.uri)))?;
        Ok(())
    }

    async fn sync(&self, local: &Path) -> Result<SyncReport, StorageError> {
        let root = local.to_path_buf();
        let files = tokio::task::spawn_blocking(move || local_files(&root))
            .await
            .map_err(|e| StorageError::Sync(format!("local walk failed: {e}")))??;

        let prefix = self.prefix_path();
        let remote: HashMap<ObjectPath, ObjectMeta> = self
            .listing
            .list(prefix.as_ref())
            .map_ok(|meta| (meta.location.clone(), meta))
            .try_collect()
            .await?;

        let mut pending = Vec::new();
        let mut report = SyncReport::default();
        for file in files {
            let key = self.key(&file.relative)?;
            if needs_upload(&file, remote.get(&key)) {
                pending.push((file, key));
            } else {
                report.files_unchanged += 1;
            }
        }
        report.files_transferred = pending.len() as u64;

        stream::iter(pending)
            .map(|(file, key)| self.upload(file, key))
            .buffer_unordered(UPLOAD_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(report)
    }
}
