//! # TableSync Protocol
//!
//! Shared data model and wire types for TableSync clients and servers.
//!
//! This crate provides:
//! - Row model: sync states, conflict types, savepoint types
//! - Schema model: column definitions with composite-type validation
//! - File manifests for change detection by content hash
//! - Change-set paging and batched row-alteration messages
//! - Extensible key-value metadata entries
//!
//! ## Key Invariants
//!
//! - A row's `conflict_type` is present iff its sync state is `in_conflict`
//! - ETags are opaque: equality testing only, never ordering
//! - Composite column types are validated once at definition time
//! - Zero-length manifest entries are placeholders, never downloads

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod error;
mod manifest;
mod metadata;
mod row;
mod schema;

pub use changeset::{
    parse_savepoint_type, AlterRowsRequest, AlterRowsResponse, ChangeSetPage, OutcomeType,
    RowChange, RowOutcome, RowResource,
};
pub use error::{ProtocolError, ProtocolResult};
pub use manifest::{FileManifestDocument, FileManifestEntry};
pub use metadata::KeyValueStoreEntry;
pub use row::{ConflictType, Row, SavepointType, Scope, SyncState};
pub use schema::{ColumnDefinition, ColumnType, TableDefinition, TableResource};
