//! Checkpoint persistence for the tablevault archiver.
//!
//! Provides the [`CheckpointStore`] trait with `SQLite` and `PostgreSQL`
//! implementations. A checkpoint is the high-water mark separating rows
//! already archived from rows still pending, keyed by `(scope, object)`.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use backend::CheckpointStore;
pub use error::StateError;
pub use self::postgres::PostgresCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
