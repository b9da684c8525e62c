//! `PostgreSQL` implementation of the database capability.
//!
//! Uses the sync `postgres` crate behind a `Mutex<Client>`. Every column is
//! read as `::text` and written back as a quoted literal, which `PostgreSQL`
//! coerces to the destination column type on insert.

use std::sync::{Mutex, MutexGuard};

use postgres::fallible_iterator::FallibleIterator;
use postgres::{Client, Config as PgConfig, IsolationLevel, NoTls};
use tablevault_types::registry::ObjectKind;

use crate::capability::{
    Column, DestinationDatabase, RawRegistryRow, RegistryQuery, SourceDatabase, StatementSink,
    TableDescription,
};
use crate::error::DatabaseError;
use crate::filter::RowFilter;
use crate::identifier::quoted;
use crate::literal::{insert_statement, Dialect, SqlValue};

/// Connection parameters for a `PostgreSQL` database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
}

/// Window bounds are bound as `timestamptz`, which only compares with
/// date and timestamp columns.
fn window_comparable(data_type: &str) -> bool {
    data_type == "date" || data_type.starts_with("timestamp")
}

/// `PostgreSQL` database used as archive source or restore destination.
pub struct PostgresDatabase {
    client: Mutex<Client>,
    name: String,
    schema: String,
}

impl PostgresDatabase {
    /// Connect using `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connect`] if the server cannot be reached or
    /// rejects the credentials.
    pub fn connect(conn: &PostgresConnection) -> Result<Self, DatabaseError> {
        quoted(&conn.schema)?;
        let mut pg = PgConfig::new();
        pg.host(&conn.host);
        pg.port(conn.port);
        pg.user(&conn.user);
        if !conn.password.is_empty() {
            pg.password(&conn.password);
        }
        pg.dbname(&conn.database);

        let client = pg
            .connect(NoTls)
            .map_err(|e| DatabaseError::Connect(format!("{}:{}/{}: {e}", conn.host, conn.port, conn.database)))?;
        tracing::debug!(
            host = conn.host,
            port = conn.port,
            database = conn.database,
            "Connected to PostgreSQL"
        );
        Ok(Self {
            client: Mutex::new(client),
            name: conn.database.clone(),
            schema: conn.schema.clone(),
        })
    }

    fn lock_client(&self) -> Result<MutexGuard<'_, Client>, DatabaseError> {
        self.client.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Schema-qualified, quoted relation name.
    fn relation(&self, table: &str) -> Result<String, DatabaseError> {
        Ok(format!("{}.{}", quoted(&self.schema)?, quoted(table)?))
    }

    /// `WHERE` clause (with leading space) and its text parameters.
    fn predicate(filter: &RowFilter) -> Result<(String, Vec<String>), DatabaseError> {
        match filter {
            RowFilter::Window { column, window } => {
                let col = quoted(column)?;
                Ok((
                    format!(" WHERE {col} >= $1::timestamptz AND {col} < $2::timestamptz"),
                    vec![window.start().to_rfc3339(), window.end().to_rfc3339()],
                ))
            }
            RowFilter::All => Ok((String::new(), Vec::new())),
        }
    }

    fn params(values: &[String]) -> Vec<&(dyn postgres::types::ToSql + Sync)> {
        values
            .iter()
            .map(|v| v as &(dyn postgres::types::ToSql + Sync))
            .collect()
    }
}

impl SourceDatabase for PostgresDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> Result<(), DatabaseError> {
        self.lock_client()?.query_one("SELECT 1", &[])?;
        Ok(())
    }

    fn read_registry(&self, query: &RegistryQuery) -> Result<Vec<RawRegistryRow>, DatabaseError> {
        let sql = format!(
            "SELECT {}::text, {}::text FROM {}",
            quoted(&query.table_column)?,
            quoted(&query.key_column)?,
            self.relation(&query.table)?
        );
        let rows = self.lock_client()?.query(sql.as_str(), &[])?;
        Ok(rows
            .iter()
            .map(|row| RawRegistryRow {
                table_name: row.get(0),
                key_column: row.get(1),
            })
            .collect())
    }

    fn describe(&self, table: &str) -> Result<Option<TableDescription>, DatabaseError> {
        let mut client = self.lock_client()?;
        let Some(row) = client.query_opt(
            "SELECT table_type::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2",
            &[&self.schema, &table],
        )?
        else {
            return Ok(None);
        };
        let table_type: String = row.get(0);
        let kind = if table_type == "VIEW" {
            ObjectKind::View
        } else {
            ObjectKind::Table
        };

        let columns = client
            .query(
                "SELECT column_name::text, data_type::text FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&self.schema, &table],
            )?
            .iter()
            .map(|r| Column::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect();
        Ok(Some(TableDescription { kind, columns }))
    }

    fn supports_window_column(&self, column: &Column) -> bool {
        window_comparable(&column.declared_type)
    }

    fn count_rows(&self, table: &str, filter: &RowFilter) -> Result<u64, DatabaseError> {
        let (predicate, values) = Self::predicate(filter)?;
        let sql = format!("SELECT COUNT(*) FROM {}{predicate}", self.relation(table)?);
        let row = self
            .lock_client()?
            .query_one(sql.as_str(), &Self::params(&values))?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn dump_rows(
        &self,
        table: &str,
        order_by: &str,
        filter: &RowFilter,
        sink: &mut dyn StatementSink,
    ) -> Result<u64, DatabaseError> {
        let columns: Vec<String> = self
            .describe(table)?
            .map(|d| d.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();
        if columns.is_empty() {
            return Err(DatabaseError::Query(format!("table '{table}' has no columns")));
        }
        let quoted_cols = columns
            .iter()
            .map(|c| quoted(c))
            .collect::<Result<Vec<_>, _>>()?;
        let select_list = quoted_cols
            .iter()
            .map(|c| format!("{c}::text"))
            .collect::<Vec<_>>()
            .join(", ");
        let (predicate, values) = Self::predicate(filter)?;
        let sql = format!(
            "SELECT {select_list} FROM {}{predicate} ORDER BY {}",
            self.relation(table)?,
            quoted(order_by)?
        );
        let insert_target = quoted(table)?;

        let mut client = self.lock_client()?;
        let mut tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()?;
        let mut written = 0u64;
        {
            let mut rows = tx.query_raw(sql.as_str(), values.iter())?;
            while let Some(row) = rows.next()? {
                let texts: Vec<Option<&str>> = (0..quoted_cols.len()).map(|i| row.get(i)).collect();
                let row_values: Vec<SqlValue<'_>> = texts
                    .iter()
                    .map(|v| v.map_or(SqlValue::Null, SqlValue::Text))
                    .collect();
                let statement =
                    insert_statement(Dialect::Postgres, &insert_target, &quoted_cols, &row_values);
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
        let sql = format!("DELETE FROM {}{predicate}", self.relation(table)?);
        let mut client = self.lock_client()?;
        let mut tx = client.transaction()?;
        let deleted = tx.execute(sql.as_str(), &Self::params(&values))?;
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

impl DestinationDatabase for PostgresDatabase {
    fn ping(&self) -> Result<(), DatabaseError> {
        SourceDatabase::ping(self)
    }

    fn apply_script(&self, script: &str) -> Result<(), DatabaseError> {
        let mut client = self.lock_client()?;
        let mut tx = client.transaction()?;
        tx.batch_execute(&format!(
            "SET LOCAL search_path TO {};",
            quoted(&self.schema)?
        ))?;
        tx.batch_execute(script)?;
        tx.commit()?;
        Ok(())
    }
}
