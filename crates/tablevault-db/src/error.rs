//! Database capability errors.

/// Errors produced by [`SourceDatabase`](crate::SourceDatabase) and
/// [`DestinationDatabase`](crate::DestinationDatabase) operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Could not establish a connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A statement failed to execute.
    #[error("query failed: {0}")]
    Query(String),

    /// A table or column name failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The statement sink failed while receiving dump output.
    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),

    /// The statement sink asked to stop.
    #[error("operation cancelled")]
    Cancelled,

    /// A windowed delete matched a different row count than the dump; rolled back.
    #[error("delete matched {actual} row(s) but {expected} were archived; rolled back")]
    DeleteMismatch { expected: u64, actual: u64 },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    pub(crate) fn query(err: impl std::fmt::Display) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        Self::query(err)
    }
}

impl From<postgres::Error> for DatabaseError {
    fn from(err: postgres::Error) -> Self {
        Self::query(err)
    }
}
