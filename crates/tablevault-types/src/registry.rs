//! Registry descriptors.

use serde::{Deserialize, Serialize};

/// One archivable object listed in the manager table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Table (or view) name in the source database.
    pub table_name: String,
    /// Column used to order rows inside the dump.
    pub key_column: String,
}

impl RegistryEntry {
    #[must_use]
    pub fn new(table_name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            key_column: key_column.into(),
        }
    }
}

/// Kind of a schema object as reported by introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
