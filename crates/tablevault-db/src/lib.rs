//! Database capability for the tablevault archiver.
//!
//! [`SourceDatabase`] covers registry reads, schema introspection, windowed
//! counts, dumps into re-insertable statements and windowed deletes.
//! [`DestinationDatabase`] applies a dump script. Both are implemented for
//! `PostgreSQL` (sync `postgres` crate) and `SQLite` (`rusqlite`).

#![warn(clippy::pedantic)]

pub mod capability;
pub mod error;
pub mod filter;
pub mod identifier;
pub mod literal;
pub mod postgres;
pub mod sqlite;

pub use capability::{
    Column, DestinationDatabase, RawRegistryRow, RegistryQuery, SourceDatabase, StatementSink,
    TableDescription,
};
pub use error::DatabaseError;
pub use filter::RowFilter;
pub use self::postgres::{PostgresConnection, PostgresDatabase};
pub use sqlite::SqliteDatabase;
