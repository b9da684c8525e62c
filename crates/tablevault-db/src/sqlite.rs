//! `SQLite` implementation of the database capability.
//!
//! Timestamp columns are compared as text in `YYYY-MM-DD HH:MM:SS` form,
//! the layout `datetime()` produces, so lexical and chronological order agree.
//! Columns with INTEGER or REAL affinity (epoch values) never compare
//! equal to or greater than such text, so they are reported unsupported.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ValueRef};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tablevault_types::registry::ObjectKind;

use crate::capability::{
    Column, DestinationDatabase, RawRegistryRow, RegistryQuery, SourceDatabase, StatementSink,
    TableDescription,
};
use crate::error::DatabaseError;
use crate::filter::RowFilter;
use crate::identifier::quoted;
use crate::literal::{insert_statement, Dialect, SqlValue};

/// Text layout window bounds are bound with.
const SQLITE_TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// `SQLite` database used as archive source or restore destination.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    name: String,
}

impl SqliteDatabase {
    /// Open the database file at `path`; the file stem becomes the logical name.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connect`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|e| DatabaseError::Connect(e.to_string()))?;
        let name = path
            .file_stem()
            .map_or_else(|| "main".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self::from_connection(conn, name))
    }

    /// Wrap an existing connection (used by tests with in-memory databases).
    #[must_use]
    pub fn from_connection(conn: Connection, name: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(conn),
            name: name.into(),
        }
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn bound(ts: DateTime<Utc>) -> String {
        ts.format(SQLITE_TS_FMT).to_string()
    }

    /// `WHERE` clause (with leading space) and its parameters.
    fn predicate(filter: &RowFilter) -> Result<(String, Vec<String>), DatabaseError> {
        match filter {
            RowFilter::Window { column, window } => {
                let col = quoted(column)?;
                Ok((
                    format!(" WHERE {col} >= ?1 AND {col} < ?2"),
                    vec![Self::bound(window.start()), Self::bound(window.end())],
                ))
            }
            RowFilter::All => Ok((String::new(), Vec::new())),
        }
    }

    fn params(values: &[String]) -> Vec<&dyn ToSql> {
        values.iter().map(|v| v as &dyn ToSql).collect()
    }
}

/// Column affinity as derived from a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

fn affinity(declared_type: &str) -> Affinity {
    let upper = declared_type.to_ascii_uppercase();
    if upper.contains("INT") {
        Affinity::Integer
    } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
        Affinity::Text
    } else if upper.is_empty() || upper.contains("BLOB") {
        Affinity::Blob
    } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| upper.contains(t)) {
        Affinity::Real
    } else {
        Affinity::Numeric
    }
}

impl SourceDatabase for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> Result<(), DatabaseError> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn read_registry(&self, query: &RegistryQuery) -> Result<Vec<RawRegistryRow>, DatabaseError> {
        let sql = format!(
            "SELECT CAST({} AS TEXT), CAST({} AS TEXT) FROM {}",
            quoted(&query.table_column)?,
            quoted(&query.key_column)?,
            quoted(&query.table)?
        );
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRegistryRow {
                table_name: row.get(0)?,
                key_column: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn describe(&self, table: &str) -> Result<Option<TableDescription>, DatabaseError> {
        let conn = self.lock_conn()?;
        let kind: Option<String> = conn
            .query_row(
                "SELECT type FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        let kind = match kind.as_deref() {
            None => return Ok(None),
            Some("view") => ObjectKind::View,
            Some(_) => ObjectKind::Table,
        };

        let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(Column::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(TableDescription { kind, columns }))
    }

    fn supports_window_column(&self, column: &Column) -> bool {
        !matches!(affinity(&column.declared_type), Affinity::Integer | Affinity::Real)
    }

    fn count_rows(&self, table: &str, filter: &RowFilter) -> Result<u64, DatabaseError> {
        let (predicate, values) = Self::predicate(filter)?;
        let sql = format!("SELECT COUNT(*) FROM {}{predicate}", quoted(table)?);
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(&sql, Self::params(&values).as_slice(), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn dump_rows(
        &self,
        table: &str,
        order_by: &str,
        filter: &RowFilter,
        sink: &mut dyn StatementSink,
    ) -> Result<u64, DatabaseError> {
        let table_ident = quoted(table)?;
        let (predicate, values) = Self::predicate(filter)?;
        let sql = format!(
            "SELECT * FROM {table_ident}{predicate} ORDER BY {}",
            quoted(order_by)?
        );

        let mut conn = self.lock_conn()?;
        // Deferred read transaction: one snapshot for the whole SELECT.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let mut written = 0u64;
        {
            let mut stmt = tx.prepare(&sql)?;
            let columns = stmt
                .column_names()
                .iter()
                .map(|c| quoted(c))
                .collect::<Result<Vec<_>, _>>()?;
            let mut rows = stmt.query(Self::params(&values).as_slice())?;
            while let Some(row) = rows.next()? {
                let mut row_values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    row_values.push(match row.get_ref(i)? {
                        ValueRef::Null => SqlValue::Null,
                        ValueRef::Integer(v) => SqlValue::Integer(v),
                        ValueRef::Real(v) => SqlValue::Real(v),
                        ValueRef::Text(t) => SqlValue::Text(
                            std::str::from_utf8(t).map_err(DatabaseError::query)?,
                        ),
                        ValueRef::Blob(b) => SqlValue::Blob(b),
                    });
                }
                let statement = insert_statement(Dialect::Sqlite, &table_ident, &columns, &row_values);
                sink.write_statement(&statement)?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn delete_rows(
        &self,
        table: &str,
        filter: &RowFilter,
        expected: u64,
    ) -> Result<u64, DatabaseError> {
        let (predicate, values) = Self::predicate(filter)?;
        let sql = format!("DELETE FROM {}{predicate}", quoted(table)?);
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(&sql, Self::params(&values).as_slice())? as u64;
        if deleted != expected {
            tx.rollback()?;
            return Err(DatabaseError::DeleteMismatch {
                expected,
                actual: deleted,
            });
        }
        tx.commit()?;
        Ok(deleted)
    }
}

impl DestinationDatabase for SqliteDatabase {
    fn ping(&self) -> Result<(), DatabaseError> {
        SourceDatabase::ping(self)
    }

    fn apply_script(&self, script: &str) -> Result<(), DatabaseError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(script)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use tablevault_types::window::ArchiveWindow;

    struct VecSink(Vec<String>);

    impl StatementSink for VecSink {
        fn write_statement(&mut self, statement: &str) -> Result<(), DatabaseError> {
            self.0.push(statement.to_string());
            Ok(())
        }
    }

    fn seeded() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, note TEXT, created_at TEXT);
             INSERT INTO orders VALUES (1, 'a', '2022-12-31 23:59:59');
             INSERT INTO orders VALUES (2, 'b', '2023-01-01 00:00:00');
             INSERT INTO orders VALUES (3, 'it''s', '2023-01-15 12:00:00');
             INSERT INTO orders VALUES (4, NULL, '2023-02-01 00:00:00');
             CREATE VIEW order_view AS SELECT * FROM orders;
             CREATE TABLE archive_manager (table_name TEXT, key_column TEXT);
             INSERT INTO archive_manager VALUES ('orders', 'id'), ('order_view', 'id'), (NULL, 'id');",
        )
        .unwrap();
        SqliteDatabase::from_connection(conn, "shop")
    }

    fn january() -> RowFilter {
        RowFilter::window(
            "created_at",
            ArchiveWindow::new(
                Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn registry_rows_keep_nulls() {
        let db = seeded();
        let rows = db
            .read_registry(&RegistryQuery {
                table: "archive_manager".into(),
                table_column: "table_name".into(),
                key_column: "key_column".into(),
            })
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].table_name.as_deref(), Some("orders"));
        assert!(rows[2].table_name.is_none());
    }

    #[test]
    fn missing_registry_table_errors() {
        let db = seeded();
        let err = db
            .read_registry(&RegistryQuery {
                table: "nope".into(),
                table_column: "table_name".into(),
                key_column: "key_column".into(),
            })
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
    }

    #[test]
    fn describe_distinguishes_views_and_missing() {
        let db = seeded();
        let table = db.describe("orders").unwrap().unwrap();
        assert_eq!(table.kind, ObjectKind::Table);
        assert_eq!(table.column_names(), vec!["id", "note", "created_at"]);
        assert_eq!(db.describe("order_view").unwrap().unwrap().kind, ObjectKind::View);
        assert!(db.describe("ghost").unwrap().is_none());
    }

    #[test]
    fn describe_reports_declared_types() {
        let db = seeded();
        let table = db.describe("orders").unwrap().unwrap();
        assert_eq!(table.column("id").unwrap().declared_type, "INTEGER");
        assert_eq!(table.column("created_at").unwrap().declared_type, "TEXT");
    }

    #[rstest]
    #[case("TEXT", true)]
    #[case("VARCHAR(32)", true)]
    #[case("DATETIME", true)]
    #[case("TIMESTAMP", true)]
    #[case("", true)]
    #[case("INTEGER", false)]
    #[case("BIGINT", false)]
    #[case("REAL", false)]
    #[case("double precision", false)]
    fn epoch_affinities_cannot_be_windowed(#[case] declared: &str, #[case] supported: bool) {
        let db = seeded();
        assert_eq!(
            db.supports_window_column(&Column::new("created_at", declared)),
            supported
        );
    }

    #[test]
    fn window_is_start_inclusive_end_exclusive() {
        let db = seeded();
        assert_eq!(db.count_rows("orders", &january()).unwrap(), 2);
        assert_eq!(db.count_rows("orders", &RowFilter::All).unwrap(), 4);
    }

    #[test]
    fn dump_renders_replayable_inserts() {
        let db = seeded();
        let mut sink = VecSink(Vec::new());
        let n = db.dump_rows("orders", "id", &january(), &mut sink).unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            sink.0[0],
            "INSERT INTO \"orders\" (\"id\", \"note\", \"created_at\") VALUES (2, 'b', '2023-01-01 00:00:00');"
        );

        let dest = SqliteDatabase::from_connection(Connection::open_in_memory().unwrap(), "dest");
        dest.apply_script("CREATE TABLE orders (id INTEGER PRIMARY KEY, note TEXT, created_at TEXT);")
            .unwrap();
        dest.apply_script(&sink.0.join("\n")).unwrap();
        assert_eq!(dest.count_rows("orders", &RowFilter::All).unwrap(), 2);
    }

    #[test]
    fn delete_commits_only_on_exact_count() {
        let db = seeded();
        let err = db.delete_rows("orders", &january(), 3).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::DeleteMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(db.count_rows("orders", &RowFilter::All).unwrap(), 4);

        assert_eq!(db.delete_rows("orders", &january(), 2).unwrap(), 2);
        assert_eq!(db.count_rows("orders", &RowFilter::All).unwrap(), 2);
    }

    #[test]
    fn failing_script_applies_nothing() {
        let dest = SqliteDatabase::from_connection(Connection::open_in_memory().unwrap(), "dest");
        dest.apply_script("CREATE TABLE t (id INTEGER PRIMARY KEY);").unwrap();
        let err = dest
            .apply_script("INSERT INTO t VALUES (1); INSERT INTO missing VALUES (2);")
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
        assert_eq!(dest.count_rows("t", &RowFilter::All).unwrap(), 0);
    }

    #[test]
    fn unsafe_identifiers_never_reach_sql() {
        let db = seeded();
        let err = db.count_rows("orders; DROP TABLE orders", &RowFilter::All).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidIdentifier(_)));
    }
}
