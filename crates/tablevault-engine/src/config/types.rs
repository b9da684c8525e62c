//! Archive configuration types deserialized from YAML.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tablevault_db::{PostgresConnection, RegistryQuery};
use tablevault_types::artifact::{ArtifactLayout, DumpMode};

/// Top-level archive job configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    pub version: String,
    /// Job name, carried in logs and summaries.
    pub archive: String,
    pub source: DatabaseConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub layout: ArtifactLayout,
    /// When true, archived rows are never deleted from the source.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub restore: Option<RestoreConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
}

fn default_dry_run() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./tablevault-work")
}

impl ArchiveConfig {
    /// Root of the artifact tree.
    #[must_use]
    pub fn dump_root(&self) -> PathBuf {
        self.work_dir.join("dumps")
    }
}

/// Connection settings for a source or destination database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DatabaseConfig {
    Postgres(PostgresConfig),
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

impl PostgresConfig {
    #[must_use]
    pub fn to_connection(&self) -> PostgresConnection {
        PostgresConnection {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            schema: self.schema.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

/// Location of the manager table listing archivable objects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_table")]
    pub table: String,
    #[serde(default = "default_table_column")]
    pub table_column: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
}

fn default_registry_table() -> String {
    "archive_manager".to_string()
}

fn default_table_column() -> String {
    "table_name".to_string()
}

fn default_key_column() -> String {
    "key_column".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            table: default_registry_table(),
            table_column: default_table_column(),
            key_column: default_key_column(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn query(&self) -> RegistryQuery {
        RegistryQuery {
            table: self.table.clone(),
            table_column: self.table_column.clone(),
            key_column: self.key_column.clone(),
        }
    }
}

/// What to do in incremental mode when a table lacks the timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingColumnPolicy {
    #[default]
    Skip,
    /// Dump the whole table in full mode, without touching checkpoints.
    FullDump,
}

/// Row selection window and artifact tagging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default)]
    pub mode: DumpMode,
    /// Inclusive lower bound; RFC 3339, `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
    #[serde(default)]
    pub start: Option<String>,
    /// Exclusive upper bound, same formats as `start`.
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub missing_column: MissingColumnPolicy,
    /// `strftime` pattern the run tag is rendered with.
    #[serde(default = "default_tag_format")]
    pub tag_format: String,
    /// Offset used for tags and for bounds given without one.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

fn default_timestamp_column() -> String {
    "created_at".to_string()
}

fn default_tag_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            timestamp_column: default_timestamp_column(),
            mode: DumpMode::default(),
            start: None,
            end: None,
            missing_column: MissingColumnPolicy::default(),
            tag_format: default_tag_format(),
            utc_offset: default_utc_offset(),
        }
    }
}

impl WindowConfig {
    /// Parsed `utc_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the offset is `Z`, `UTC` or `±HH:MM`.
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    /// Parsed `start`, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset or the timestamp is malformed.
    pub fn start_at(&self) -> Result<Option<DateTime<Utc>>> {
        let offset = self.offset()?;
        self.start
            .as_deref()
            .map(|raw| parse_timestamp(raw, offset))
            .transpose()
    }

    /// Parsed `end`, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset or the timestamp is malformed.
    pub fn end_at(&self) -> Result<Option<DateTime<Utc>>> {
        let offset = self.offset()?;
        self.end
            .as_deref()
            .map(|raw| parse_timestamp(raw, offset))
            .transpose()
    }
}

/// Parse `Z`, `UTC` or `±HH:MM`.
///
/// # Errors
///
/// Returns an error for any other shape or an out-of-range offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid offset '{raw}'"));
    }
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => bail!("invalid utc_offset '{raw}', expected ±HH:MM"),
    };
    let Some((hh, mm)) = rest.split_once(':') else {
        bail!("invalid utc_offset '{raw}', expected ±HH:MM");
    };
    let hours: i32 = hh
        .parse()
        .map_err(|_| anyhow!("invalid utc_offset '{raw}', expected ±HH:MM"))?;
    let minutes: i32 = mm
        .parse()
        .map_err(|_| anyhow!("invalid utc_offset '{raw}', expected ±HH:MM"))?;
    if hh.len() != 2 || mm.len() != 2 || minutes >= 60 {
        bail!("invalid utc_offset '{raw}', expected ±HH:MM");
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("utc_offset '{raw}' out of range"))
}

/// Parse a window bound. Values without an offset are read in `offset`.
///
/// # Errors
///
/// Returns an error if no accepted format matches.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            anyhow!("invalid timestamp '{raw}', expected RFC 3339, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS")
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("timestamp '{raw}' is ambiguous in offset {offset}"))
}

/// Restore target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestoreConfig {
    pub destination: DatabaseConfig,
    /// Keep the local artifact after a successful restore.
    #[serde(default)]
    pub keep_artifact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// `aws s3 sync`.
    #[default]
    S3,
    /// Plain directory copy.
    Local,
}

/// Remote storage the artifact tree is synced to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    /// Destination directory for the `local` backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Local artifacts older than this are removed after a successful sync.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_storage_class() -> String {
    "STANDARD_IA".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    10
}

impl StorageConfig {
    /// Remote destination string handed to the object store.
    #[must_use]
    pub fn remote_uri(&self) -> String {
        match self.backend {
            StorageBackendKind::S3 => {
                let bucket = self.bucket.as_deref().unwrap_or_default();
                let prefix = self.prefix.trim_matches('/');
                if prefix.is_empty() {
                    format!("s3://{bucket}")
                } else {
                    format!("s3://{bucket}/{prefix}")
                }
            }
            StorageBackendKind::Local => {
                let base = self.path.clone().unwrap_or_default();
                let prefix = self.prefix.trim_matches('/');
                if prefix.is_empty() {
                    base.display().to_string()
                } else {
                    base.join(prefix).display().to_string()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
    Postgres,
}

/// Checkpoint store settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// `SQLite` path or `PostgreSQL` connection string.
    /// Defaults to `{work_dir}/state.db` for `SQLite`.
    #[serde(default)]
    pub connection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceConfig {
    /// Objects processed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_parallelism() -> u32 {
    1
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
        }
    }
}
