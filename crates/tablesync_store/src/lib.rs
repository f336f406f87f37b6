//! # TableSync Store
//!
//! Local store contract and row-lifecycle engine.
//!
//! This crate provides:
//! - Reference-counted named connections over one shared store
//! - Exclusive/deferred transactions with all-or-nothing commit
//! - The row lifecycle state machine: edit tracking, checkpoint stack,
//!   conflict placement and resolution
//! - Table metadata (schemaETag / lastDataETag / lastSyncTime)
//! - Key-value metadata and the server-ETag cache used for manifest
//!   short-circuiting
//!
//! ## Key Invariants
//!
//! - A conflicted row is stored structurally as exactly two variants
//!   (one client-authored, one server-authored)
//! - No row is mutated while in conflict except through the two resolve
//!   operations
//! - A crash mid-transaction leaves the store in the pre- or post-step
//!   state, never a mix
//! - Table health is derived from maintained counters, never a scan

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod lifecycle;
mod meta;
mod registry;
mod store;

pub use error::{StoreError, StoreResult};
pub use lifecycle::{RowInput, RowPresence, TableHealth};
pub use meta::{app_scope, row_scope, table_scope};
pub use registry::{MaintenancePause, StoreHandle, StoreRegistry};
pub use store::{TableStore, Transaction, TransactionKind};
