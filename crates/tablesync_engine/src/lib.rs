//! # TableSync Engine
//!
//! Client-side synchronization engine: pulls server row changes, pushes
//! local mutations, reconciles schemas, and transfers configuration
//! files and row attachments.
//!
//! This crate provides:
//! - A full-pass orchestrator with staged progress and cancellation
//! - Change-set pull/push with optimistic concurrency and conflict
//!   materialization
//! - Manifest diffing by content hash with ETag short-circuiting
//! - Size-bounded attachment batch planning and multipart transfer
//! - A REST synchronizer over a pluggable HTTP client
//!
//! ## Key Invariants
//!
//! - The recorded dataETag advances only when the server accepted at
//!   least one row and nothing failed table-wide
//! - A rejected push never mutates the local row; the follow-up pull
//!   materializes the conflict with both variants
//! - Synced attachments are immutable; hash disagreements are surfaced,
//!   never papered over
//! - One table's failure never stops the other tables' sync

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachments;
mod config;
mod differ;
mod error;
mod files;
mod http;
mod multipart;
mod orchestrator;
mod planner;
mod rows;
mod schema;
mod transport;

pub use attachments::{sync_row_attachments, sync_table_attachments, AttachmentOutcome};
pub use config::{RetryConfig, SyncConfig, MAX_BATCH_SIZE};
pub use differ::{diff_manifest, diff_manifest_pull, diff_manifest_push, ManifestDiff};
pub use error::{SyncError, SyncResult};
pub use files::{content_hash, DiskFileStore, FileStore, MemoryFileStore};
pub use http::{HttpClient, HttpRequest, HttpResponse, RestSynchronizer, PROTOCOL_VERSION, VERSION_HEADER};
pub use multipart::{content_type, decode_batch, encode_batch, make_boundary};
pub use orchestrator::{
    SyncOrchestrator, SyncProgress, SyncRunResult, SyncStage, TableOutcome,
};
pub use planner::{plan_batches, TransferBatch};
pub use rows::{pull_changes, push_changes, sync_table_rows, PullStats, TableSyncOutcome};
pub use schema::{reconcile_table, SchemaAction};
pub use transport::{
    AttachmentFile, ManifestOutcome, ManifestScope, MockSynchronizer, Synchronizer,
};
