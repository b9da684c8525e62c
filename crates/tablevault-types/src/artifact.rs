//! Dump artifacts and their on-disk naming.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Extraction mode for a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpMode {
    /// Fixed configured window (or whole table when falling back).
    #[default]
    Full,
    /// Window starts at the last table checkpoint.
    Incremental,
}

impl DumpMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for DumpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory layout for artifacts under the dump root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLayout {
    /// `{root}/{database}/{object}/{mode}/{tag}/{object}_{mode}_{tag}.sql`
    #[default]
    Checkpointed,
    /// `{root}/{database}/{object}/{tag}/{object}_{tag}.sql`
    Simple,
}

impl ArtifactLayout {
    /// Deterministic artifact path for one object dump.
    #[must_use]
    pub fn artifact_path(
        self,
        root: &Path,
        database: &str,
        object: &str,
        mode: DumpMode,
        tag: &str,
    ) -> PathBuf {
        let base = root.join(database).join(object);
        match self {
            Self::Checkpointed => base
                .join(mode.as_str())
                .join(tag)
                .join(format!("{object}_{mode}_{tag}.sql")),
            Self::Simple => base.join(tag).join(format!("{object}_{tag}.sql")),
        }
    }
}

/// A written, non-empty dump file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpArtifact {
    pub path: PathBuf,
    pub object: String,
    pub tag: String,
    pub mode: DumpMode,
    pub row_count: u64,
}
