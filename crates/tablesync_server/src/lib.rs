//! # TableSync Server
//!
//! An in-process reference implementation of the sync server contract.
//!
//! This crate provides:
//! - [`InProcessServer`], a [`tablesync_engine::Synchronizer`] backed by
//!   in-memory tables, configuration files, and attachments
//! - Per-row optimistic concurrency with rotating row ETags and a
//!   monotonic per-table dataETag
//! - A paged change feed with resume cursors and a settable page size
//! - Failure-injection knobs (auth failures, transient transport
//!   failures, blanket row rejection) for exercising client error paths
//!
//! ## Key Invariants
//!
//! - A mutation is accepted only when its presented row ETag matches the
//!   server's current one; every acceptance assigns a fresh ETag
//! - Deletes leave tombstones so the change feed reports them
//! - Attachments are immutable once stored; re-uploads must match
//!
//! The server is intended for tests and local development, not for
//! production deployment.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod server;
mod state;

pub use server::InProcessServer;
