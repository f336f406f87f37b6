//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (malformed message or unexpected payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication or authorization failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server speaks an incompatible protocol revision (or an
    /// intermediary answered in its place).
    #[error("incompatible server: {0}")]
    IncompatibleServer(String),

    /// The server's column structure differs from the local one and
    /// cannot be adopted without data migration.
    #[error("schema mismatch for table {table_id}: {message}")]
    SchemaMismatch {
        /// The affected table.
        table_id: String,
        /// What differed.
        message: String,
    },

    /// A synced attachment's content changed, which the protocol forbids.
    #[error("attachment content changed for {relative_path} in row {row_id}")]
    AttachmentImmutabilityViolation {
        /// The owning row.
        row_id: String,
        /// The attachment path.
        relative_path: String,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] tablesync_store::StoreError),

    /// File storage error.
    #[error("file storage error: {0}")]
    FileStorage(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}
