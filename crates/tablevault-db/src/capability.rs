//! Database capability traits.

use tablevault_types::registry::ObjectKind;

use crate::error::DatabaseError;
use crate::filter::RowFilter;

/// Where the registry of archivable objects lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryQuery {
    pub table: String,
    pub table_column: String,
    pub key_column: String,
}

/// A registry row as stored; either field may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegistryRow {
    pub table_name: Option<String>,
    pub key_column: Option<String>,
}

/// One column of a described object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Type as declared in the schema; `SQLite` allows it to be empty.
    pub declared_type: String,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }
}

/// Result of introspecting one schema object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub kind: ObjectKind,
    pub columns: Vec<Column>,
}

impl TableDescription {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Receives dump output one statement at a time.
pub trait StatementSink {
    /// Accept one complete, self-contained SQL statement.
    ///
    /// # Errors
    ///
    /// Returning [`DatabaseError::Cancelled`] or an I/O error aborts the dump.
    fn write_statement(&mut self, statement: &str) -> Result<(), DatabaseError>;
}

/// Read/delete side of the archive: the database rows are taken from.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn SourceDatabase>`.
pub trait SourceDatabase: Send + Sync {
    /// Logical database name, used in artifact paths.
    fn name(&self) -> &str;

    /// Cheap connectivity check.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] if the database cannot be reached.
    fn ping(&self) -> Result<(), DatabaseError>;

    /// Read every row of the registry table.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] if the registry query cannot execute.
    fn read_registry(&self, query: &RegistryQuery) -> Result<Vec<RawRegistryRow>, DatabaseError>;

    /// Resolve kind and columns of `table`; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] if introspection fails.
    fn describe(&self, table: &str) -> Result<Option<TableDescription>, DatabaseError>;

    /// Whether window bounds compare chronologically against values of
    /// `column`. The planner skips tables whose timestamp column fails this.
    fn supports_window_column(&self, column: &Column) -> bool;

    /// Count rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] on query failure.
    fn count_rows(&self, table: &str, filter: &RowFilter) -> Result<u64, DatabaseError>;

    /// Stream rows matching `filter`, ordered by `order_by`, into `sink` as
    /// `INSERT` statements, inside a single consistent read snapshot.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] on query or sink failure.
    fn dump_rows(
        &self,
        table: &str,
        order_by: &str,
        filter: &RowFilter,
        sink: &mut dyn StatementSink,
    ) -> Result<u64, DatabaseError>;

    /// Delete rows matching `filter` in one transaction, committing only if
    /// exactly `expected` rows matched.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::DeleteMismatch`] (after rolling back) when
    /// the count differs, or [`DatabaseError`] on query failure.
    fn delete_rows(
        &self,
        table: &str,
        filter: &RowFilter,
        expected: u64,
    ) -> Result<u64, DatabaseError>;
}

/// Restore side: a database dumps are applied to.
pub trait DestinationDatabase: Send + Sync {
    /// Cheap connectivity check.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] if the database cannot be reached.
    fn ping(&self) -> Result<(), DatabaseError>;

    /// Execute a dump script atomically.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] if any statement fails; nothing is applied.
    fn apply_script(&self, script: &str) -> Result<(), DatabaseError>;
}
