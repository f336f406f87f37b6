//! Change-set synchronization: pulling server row changes and pushing
//! local mutations.
//!
//! Pushes are optimistic: each mutation presents the row ETag it last
//! synced against, and the server rejects rows whose ETag is stale. A
//! rejected row stays pending; the follow-up pull fetches the winning
//! server revision and places the row into conflict, so conflicts are
//! always materialized with both variants present.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::transport::Synchronizer;
use tablesync_protocol::{
    AlterRowsRequest, ConflictType, OutcomeType, Row, RowChange, RowResource, SyncState,
};
use tablesync_store::{RowPresence, StoreResult, TableStore, Transaction, TransactionKind};
use tracing::{debug, info, warn};

/// Counters for one table's row-data pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSyncOutcome {
    /// Server changes applied locally.
    pub pulled: usize,
    /// Local mutations the server accepted.
    pub pushed: usize,
    /// Rows placed into conflict.
    pub conflicts: usize,
    /// Mutations the server denied for permissions.
    pub denied: usize,
    /// Mutations the server failed to process.
    pub failed: usize,
    /// Rows skipped because they carry open checkpoints.
    pub checkpoint_skips: usize,
}

/// Counters for one pull pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Server changes applied locally (conflict placements included).
    pub applied: usize,
    /// Rows placed into conflict.
    pub conflicts: usize,
}

/// What applying one server change did.
enum Applied {
    Noop,
    Row,
    Conflict,
}

/// Runs a full row-data pass for one table: pull, push, and a follow-up
/// pull when any pushed row was rejected as stale.
pub fn sync_table_rows(
    store: &TableStore,
    sync: &dyn Synchronizer,
    config: &SyncConfig,
    table_id: &str,
) -> SyncResult<TableSyncOutcome> {
    let mut outcome = TableSyncOutcome::default();
    let stats = pull_changes(store, sync, table_id)?;
    outcome.pulled = stats.applied;
    outcome.conflicts = stats.conflicts;
    let needs_follow_up = push_changes(store, sync, config, table_id, &mut outcome)?;
    if needs_follow_up {
        // Materialize conflicts for the rejected rows. Those rows were
        // already counted when the push reported them.
        outcome.pulled += pull_changes(store, sync, table_id)?.applied;
    }
    info!(
        table_id,
        pulled = outcome.pulled,
        pushed = outcome.pushed,
        conflicts = outcome.conflicts,
        "row data pass complete"
    );
    Ok(outcome)
}

/// Pulls and applies all pending server changes for one table.
///
/// Each page is applied in one transaction; the recorded dataETag only
/// advances with the final page, so an interrupted pull resumes from the
/// previous epoch.
pub fn pull_changes(
    store: &TableStore,
    sync: &dyn Synchronizer,
    table_id: &str,
) -> SyncResult<PullStats> {
    let since = store.last_data_etag(table_id);
    let mut cursor: Option<String> = None;
    let mut stats = PullStats::default();

    loop {
        let page = sync.get_changes(table_id, since.as_deref(), cursor.as_deref())?;
        let has_more = page.has_more;
        cursor = page.web_safe_resume_cursor.clone();

        store.transaction(TransactionKind::Exclusive, |txn| {
            for incoming in &page.rows {
                match apply_server_change(txn, table_id, incoming)? {
                    Applied::Noop => {}
                    Applied::Row => stats.applied += 1,
                    Applied::Conflict => {
                        stats.applied += 1;
                        stats.conflicts += 1;
                    }
                }
            }
            if !has_more {
                txn.set_last_data_etag(table_id, page.data_etag.clone())?;
            }
            Ok(())
        })?;

        if !has_more {
            break;
        }
    }
    Ok(stats)
}

/// Applies one server change.
fn apply_server_change(
    txn: &mut Transaction<'_>,
    table_id: &str,
    incoming: &RowResource,
) -> StoreResult<Applied> {
    let pending_files = txn.table_has_attachment_columns(table_id)?;
    let synced_state = if pending_files {
        SyncState::SyncedPendingFiles
    } else {
        SyncState::Synced
    };

    match txn.row(table_id, &incoming.row_id) {
        None => {
            if incoming.deleted {
                return Ok(Applied::Noop);
            }
            txn.put_server_row(table_id, incoming.to_local_row(synced_state))?;
            Ok(Applied::Row)
        }
        Some(RowPresence::Simple(local)) => {
            if local.sync_state.is_pending_push() {
                if local.row_etag.as_deref() == Some(incoming.row_etag.as_str()) {
                    // We already synced against this revision; the local
                    // edit stays pending.
                    return Ok(Applied::Noop);
                }
                if local.sync_state == SyncState::Deleted && incoming.deleted {
                    // Both sides deleted: nothing to fight over.
                    txn.remove_row(table_id, &incoming.row_id)?;
                    return Ok(Applied::Row);
                }
                let local_tag = if local.sync_state == SyncState::Deleted {
                    ConflictType::LocalDeletedOldValues
                } else {
                    ConflictType::LocalUpdatedUpdatedValues
                };
                let server_tag = if incoming.deleted {
                    ConflictType::ServerDeletedOldValues
                } else {
                    ConflictType::ServerUpdatedUpdatedValues
                };
                let server_variant = incoming.to_local_row(SyncState::InConflict);
                txn.place_into_conflict(table_id, local, server_variant, local_tag, server_tag)?;
                Ok(Applied::Conflict)
            } else {
                // Clean local row: the server revision wins outright.
                if incoming.deleted {
                    txn.remove_row(table_id, &incoming.row_id)?;
                } else if local.row_etag.as_deref() == Some(incoming.row_etag.as_str()) {
                    return Ok(Applied::Noop);
                } else {
                    txn.put_server_row(table_id, incoming.to_local_row(synced_state))?;
                }
                Ok(Applied::Row)
            }
        }
        Some(RowPresence::Conflicted { .. }) => {
            // Already awaiting resolution; the next sync after resolving
            // picks up whatever the server has by then.
            warn!(
                table_id,
                row_id = %incoming.row_id,
                "skipping server change for row already in conflict"
            );
            Ok(Applied::Noop)
        }
    }
}

/// Pushes pending local mutations. Returns true when a follow-up pull is
/// needed to materialize push-rejection conflicts.
pub fn push_changes(
    store: &TableStore,
    sync: &dyn Synchronizer,
    config: &SyncConfig,
    table_id: &str,
    outcome: &mut TableSyncOutcome,
) -> SyncResult<bool> {
    let (pending, skipped) = store.rows_pending_push(table_id);
    outcome.checkpoint_skips = skipped;
    if skipped > 0 {
        debug!(table_id, skipped, "rows with open checkpoints held back from push");
    }
    if pending.is_empty() {
        return Ok(false);
    }

    let pending_files = store.table_definition(table_id)?.has_attachment_columns();
    let mut needs_follow_up = false;

    for chunk in pending.chunks(config.push_batch_rows) {
        let request = AlterRowsRequest {
            data_etag: store.last_data_etag(table_id),
            rows: chunk.iter().map(to_row_change).collect(),
        };
        let response = sync.alter_rows(table_id, &request)?;

        store.transaction(TransactionKind::Exclusive, |txn| {
            for row_outcome in &response.outcomes {
                match row_outcome.outcome {
                    OutcomeType::Success => {
                        outcome.pushed += 1;
                        if row_outcome.deleted {
                            txn.remove_row(table_id, &row_outcome.row_id)?;
                        } else if let Some(etag) = &row_outcome.row_etag {
                            txn.mark_synced(
                                table_id,
                                &row_outcome.row_id,
                                etag.clone(),
                                pending_files,
                            )?;
                        }
                    }
                    OutcomeType::InConflict => {
                        outcome.conflicts += 1;
                        needs_follow_up = true;
                    }
                    OutcomeType::Denied => {
                        outcome.denied += 1;
                        // A denied insert may be colliding with a row the
                        // server already holds; the pull surfaces it.
                        needs_follow_up = true;
                    }
                    OutcomeType::Failed => outcome.failed += 1,
                }
            }
            if response.may_advance_data_etag() {
                txn.set_last_data_etag(table_id, response.new_data_etag.clone())?;
            }
            Ok(())
        })?;
    }
    Ok(needs_follow_up)
}

fn to_row_change(row: &Row) -> RowChange {
    RowChange {
        row_id: row.row_id.clone(),
        row_etag: row.row_etag.clone(),
        deleted: row.sync_state == SyncState::Deleted,
        values: row.values.clone(),
        savepoint_type: row.savepoint_type.map(|s| s.as_str().to_string()),
        savepoint_timestamp: row.savepoint_timestamp.clone(),
        savepoint_creator: row.savepoint_creator.clone(),
        scope: row.scope.clone(),
        form_id: row.form_id.clone(),
        locale: row.locale.clone(),
    }
}
