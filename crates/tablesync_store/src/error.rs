//! Error types for the local store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller violated an operation precondition.
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),

    /// The store could not be opened because of contention.
    #[error("store busy: open contention not resolved after {attempts} attempts")]
    Busy {
        /// How many open attempts were made.
        attempts: u32,
    },

    /// Table not found.
    #[error("table not found: {table_id}")]
    TableNotFound {
        /// The table that was requested.
        table_id: String,
    },

    /// Table already exists.
    #[error("table already exists: {table_id}")]
    TableExists {
        /// The conflicting table id.
        table_id: String,
    },

    /// Row not found.
    #[error("row not found: {row_id} in table {table_id}")]
    RowNotFound {
        /// The owning table.
        table_id: String,
        /// The row that was requested.
        row_id: String,
    },

    /// Row already exists (use update instead of insert).
    #[error("row already exists: {row_id} in table {table_id}")]
    RowExists {
        /// The owning table.
        table_id: String,
        /// The conflicting row id.
        row_id: String,
    },

    /// The row is in conflict and only resolve operations may touch it.
    #[error("row {row_id} in table {table_id} is in conflict")]
    RowInConflict {
        /// The owning table.
        table_id: String,
        /// The conflicted row.
        row_id: String,
    },

    /// The row is not in conflict but a resolve operation was requested.
    #[error("row {row_id} in table {table_id} is not in conflict")]
    RowNotInConflict {
        /// The owning table.
        table_id: String,
        /// The row in question.
        row_id: String,
    },

    /// No checkpoint exists for the row.
    #[error("no checkpoint exists for row {row_id} in table {table_id}")]
    NoCheckpoint {
        /// The owning table.
        table_id: String,
        /// The row in question.
        row_id: String,
    },

    /// Schema validation failed.
    #[error(transparent)]
    Schema(#[from] tablesync_protocol::ProtocolError),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}
