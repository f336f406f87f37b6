//! Error types for protocol validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A column definition is structurally invalid.
    #[error("invalid column definition for '{element_key}': {message}")]
    InvalidColumn {
        /// The storage column key.
        element_key: String,
        /// Description of the violation.
        message: String,
    },

    /// A table definition is structurally invalid.
    #[error("invalid table definition for '{table_id}': {message}")]
    InvalidTable {
        /// The table identifier.
        table_id: String,
        /// Description of the violation.
        message: String,
    },

    /// A conflict-type pairing is not one local plus one server value.
    #[error("invalid conflict pair: {local:?} / {server:?}")]
    InvalidConflictPair {
        /// The value offered for the client-authored variant.
        local: crate::ConflictType,
        /// The value offered for the server-authored variant.
        server: crate::ConflictType,
    },
}
