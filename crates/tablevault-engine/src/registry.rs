//! Registry snapshot: the archivable objects for one run.

use std::collections::HashSet;

use tablevault_db::identifier::validate_identifier;
use tablevault_db::{RawRegistryRow, RegistryQuery, SourceDatabase};
use tablevault_types::error::ObjectError;
use tablevault_types::registry::RegistryEntry;

use crate::errors::ArchiveError;

/// Registry rows accepted and rejected for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub entries: Vec<RegistryEntry>,
    pub rejected: Vec<ObjectError>,
}

/// Reads the manager table once per run.
pub struct RegistryReader<'a> {
    source: &'a dyn SourceDatabase,
    query: RegistryQuery,
}

impl<'a> RegistryReader<'a> {
    #[must_use]
    pub fn new(source: &'a dyn SourceDatabase, query: RegistryQuery) -> Self {
        Self { source, query }
    }

    /// Load the registry, keeping the first occurrence of each table.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::RegistryUnavailable`] if the registry query
    /// cannot execute. An empty registry is not an error.
    pub fn list_objects(&self) -> Result<RegistrySnapshot, ArchiveError> {
        let rows = self.source.read_registry(&self.query).map_err(|e| {
            ArchiveError::RegistryUnavailable(format!(
                "{}.{}: {e}",
                self.source.name(),
                self.query.table
            ))
        })?;
        let snapshot = normalize(rows);
        for rejected in &snapshot.rejected {
            tracing::warn!(
                registry = self.query.table,
                reason = %rejected,
                "Skipping registry row"
            );
        }
        tracing::info!(
            registry = self.query.table,
            objects = snapshot.entries.len(),
            rejected = snapshot.rejected.len(),
            "Loaded archive registry"
        );
        Ok(snapshot)
    }
}

fn normalize(rows: Vec<RawRegistryRow>) -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::default();
    let mut seen = HashSet::new();

    for (index, row) in rows.into_iter().enumerate() {
        let table = row.table_name.as_deref().map(str::trim).unwrap_or_default();
        let key = row.key_column.as_deref().map(str::trim).unwrap_or_default();

        if table.is_empty() || key.is_empty() {
            snapshot.rejected.push(ObjectError::InvalidRegistryRow(format!(
                "row {index}: table_name and key_column must both be set"
            )));
            continue;
        }
        if let Err(reason) = validate_identifier(table).and_then(|()| validate_identifier(key)) {
            snapshot
                .rejected
                .push(ObjectError::InvalidRegistryRow(format!("row {index}: {reason}")));
            continue;
        }
        if !seen.insert(table.to_string()) {
            snapshot.rejected.push(ObjectError::InvalidRegistryRow(format!(
                "row {index}: duplicate table '{table}'"
            )));
            continue;
        }
        snapshot.entries.push(RegistryEntry::new(table, key));
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: Option<&str>, key: Option<&str>) -> RawRegistryRow {
        RawRegistryRow {
            table_name: table.map(String::from),
            key_column: key.map(String::from),
        }
    }

    #[test]
    fn keeps_valid_rows_in_order() {
        let snapshot = normalize(vec![
            row(Some("orders"), Some("id")),
            row(Some("order_view"), Some("id")),
        ]);
        assert_eq!(
            snapshot.entries,
            vec![
                RegistryEntry::new("orders", "id"),
                RegistryEntry::new("order_view", "id")
            ]
        );
        assert!(snapshot.rejected.is_empty());
    }

    #[test]
    fn rejects_null_and_blank_names() {
        let snapshot = normalize(vec![
            row(None, Some("id")),
            row(Some("orders"), None),
            row(Some("   "), Some("id")),
        ]);
        assert!(snapshot.entries.is_empty());
        assert_eq!(snapshot.rejected.len(), 3);
        assert!(snapshot
            .rejected
            .iter()
            .all(|e| e.kind() == "invalid_registry_row"));
    }

    #[test]
    fn trims_whitespace() {
        let snapshot = normalize(vec![row(Some(" orders "), Some("id\n"))]);
        assert_eq!(snapshot.entries, vec![RegistryEntry::new("orders", "id")]);
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let snapshot = normalize(vec![row(Some("orders; DROP TABLE x"), Some("id"))]);
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.rejected[0].to_string().contains("invalid character"));
    }

    #[test]
    fn duplicates_after_first_are_rejected() {
        let snapshot = normalize(vec![
            row(Some("orders"), Some("id")),
            row(Some("orders"), Some("order_no")),
        ]);
        assert_eq!(snapshot.entries, vec![RegistryEntry::new("orders", "id")]);
        assert!(snapshot.rejected[0].to_string().contains("duplicate"));
    }

    #[test]
    fn empty_registry_is_nothing_to_do() {
        assert_eq!(normalize(Vec::new()), RegistrySnapshot::default());
    }
}
