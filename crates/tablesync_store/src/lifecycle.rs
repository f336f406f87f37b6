//! Row lifecycle engine: edit tracking, checkpoint stack, conflict
//! placement and resolution.
//!
//! Conflicts are modeled structurally: a row is either `Simple` or
//! `Conflicted { local, server }`, so the "exactly two variants" rule is
//! enforced by the type rather than by convention.

use crate::error::{StoreError, StoreResult};
use crate::store::{TableStore, Transaction};
use std::collections::BTreeMap;
use tablesync_protocol::{ConflictType, ProtocolError, Row, SavepointType, Scope, SyncState};
use tracing::debug;

/// Caller-supplied content for an insert, update, or checkpoint.
///
/// `conflict_type` and `savepoint_type` exist on this struct only so the
/// engine can reject callers that try to set them: both are managed
/// exclusively by lifecycle operations.
#[derive(Debug, Clone, Default)]
pub struct RowInput {
    /// Row identifier.
    pub row_id: String,
    /// Column values, keyed by element key.
    pub values: BTreeMap<String, Option<String>>,
    /// When this revision was saved. Required: a missing timestamp is a
    /// precondition violation, never silently defaulted.
    pub savepoint_timestamp: Option<String>,
    /// Who saved this revision.
    pub savepoint_creator: Option<String>,
    /// Visibility scoping.
    pub scope: Scope,
    /// Authoring form.
    pub form_id: Option<String>,
    /// Authoring locale.
    pub locale: Option<String>,
    /// Must be `None`; lifecycle-managed.
    pub conflict_type: Option<ConflictType>,
    /// Must be `None`; lifecycle-managed.
    pub savepoint_type: Option<SavepointType>,
}

impl RowInput {
    /// Creates an input for the given row id and savepoint timestamp.
    pub fn new(row_id: impl Into<String>, savepoint_timestamp: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            savepoint_timestamp: Some(savepoint_timestamp.into()),
            ..Default::default()
        }
    }

    /// Sets a column value.
    pub fn with_value(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Sets the savepoint creator.
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.savepoint_creator = Some(creator.into());
        self
    }
}

/// How a row is physically present in a table.
#[derive(Debug, Clone, PartialEq)]
pub enum RowPresence {
    /// One revision.
    Simple(Row),
    /// Two paired revisions; placed only by `place_into_conflict`.
    Conflicted {
        /// The client-authored variant (a LOCAL_* conflict type).
        local: Row,
        /// The server-authored variant (a SERVER_* conflict type).
        server: Row,
    },
}

impl RowPresence {
    /// The variants in display order (by conflict-type code for
    /// conflicted rows).
    pub fn variants(&self) -> Vec<&Row> {
        match self {
            RowPresence::Simple(row) => vec![row],
            RowPresence::Conflicted { local, server } => {
                let mut pair = vec![local, server];
                pair.sort_by_key(|r| r.conflict_type.map(|c| c.to_code()).unwrap_or(0));
                pair
            }
        }
    }
}

/// Physical storage for one row id: its presence plus stacked open
/// checkpoints, newest last.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowRecord {
    pub presence: Option<RowPresence>,
    pub checkpoints: Vec<Row>,
}

impl RowRecord {
    fn is_empty(&self) -> bool {
        self.presence.is_none() && self.checkpoints.is_empty()
    }
}

/// Derived health of a table. Never stored; computed from maintained
/// counters in O(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableHealth {
    /// No open checkpoints and no conflicts.
    Clean,
    /// At least one open checkpoint, no conflicts.
    HasCheckpoints,
    /// At least one conflicted row, no open checkpoints.
    HasConflicts,
    /// Both open checkpoints and conflicted rows exist.
    HasCheckpointsAndConflicts,
}

impl TableHealth {
    fn from_counts(checkpoints: usize, conflicts: usize) -> Self {
        match (checkpoints > 0, conflicts > 0) {
            (false, false) => TableHealth::Clean,
            (true, false) => TableHealth::HasCheckpoints,
            (false, true) => TableHealth::HasConflicts,
            (true, true) => TableHealth::HasCheckpointsAndConflicts,
        }
    }
}

fn validate_input(input: &RowInput) -> StoreResult<()> {
    if input.row_id.is_empty() {
        return Err(StoreError::PreconditionViolation(
            "row id must not be empty".into(),
        ));
    }
    if input.conflict_type.is_some() {
        return Err(StoreError::PreconditionViolation(
            "conflict_type is lifecycle-managed and may not be set by callers".into(),
        ));
    }
    if input.savepoint_type.is_some() {
        return Err(StoreError::PreconditionViolation(
            "savepoint_type is lifecycle-managed and may not be set by callers".into(),
        ));
    }
    if input.savepoint_timestamp.is_none() {
        return Err(StoreError::PreconditionViolation(
            "savepoint_timestamp is required".into(),
        ));
    }
    Ok(())
}

fn build_row(input: RowInput, sync_state: SyncState, savepoint_type: Option<SavepointType>) -> Row {
    Row {
        row_id: input.row_id,
        row_etag: None,
        sync_state,
        conflict_type: None,
        savepoint_type,
        // validated non-empty by validate_input
        savepoint_timestamp: input.savepoint_timestamp.unwrap_or_default(),
        savepoint_creator: input.savepoint_creator,
        scope: input.scope,
        form_id: input.form_id,
        locale: input.locale,
        values: input.values,
    }
}

impl Transaction<'_> {
    /// Fetches a row's presence within this transaction's view.
    pub fn row(&self, table_id: &str, row_id: &str) -> Option<RowPresence> {
        self.inner
            .tables
            .get(table_id)
            .and_then(|t| t.rows.get(row_id))
            .and_then(|r| r.presence.clone())
    }

    /// Returns true if the table carries attachment columns.
    pub fn table_has_attachment_columns(&self, table_id: &str) -> StoreResult<bool> {
        self.inner
            .tables
            .get(table_id)
            .map(|t| t.definition.has_attachment_columns())
            .ok_or_else(|| StoreError::TableNotFound {
                table_id: table_id.to_string(),
            })
    }

    fn validate_columns(&mut self, table_id: &str, input: &RowInput) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        for key in input.values.keys() {
            if !table
                .definition
                .columns
                .iter()
                .any(|c| &c.element_key == key)
            {
                return Err(StoreError::PreconditionViolation(format!(
                    "value supplied for undefined column '{key}' in table '{table_id}'"
                )));
            }
        }
        Ok(())
    }

    /// Inserts a new local row in `new_row` state.
    ///
    /// Fails on a duplicate row id: re-inserting an existing row must go
    /// through `update_row` instead.
    pub fn insert_row(&mut self, table_id: &str, input: RowInput) -> StoreResult<()> {
        validate_input(&input)?;
        self.validate_columns(table_id, &input)?;
        let table = self.table_mut(table_id)?;
        if table
            .rows
            .get(&input.row_id)
            .is_some_and(|r| !r.is_empty())
        {
            return Err(StoreError::RowExists {
                table_id: table_id.to_string(),
                row_id: input.row_id,
            });
        }
        let row_id = input.row_id.clone();
        let row = build_row(input, SyncState::NewRow, Some(SavepointType::Complete));
        table
            .rows
            .entry(row_id)
            .or_default()
            .presence = Some(RowPresence::Simple(row));
        Ok(())
    }

    /// Updates a row in place, advancing its edit state.
    pub fn update_row(&mut self, table_id: &str, input: RowInput) -> StoreResult<()> {
        validate_input(&input)?;
        self.validate_columns(table_id, &input)?;
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(&input.row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: input.row_id.clone(),
            })?;
        match &mut record.presence {
            Some(RowPresence::Simple(row)) => {
                if row.sync_state == SyncState::Deleted {
                    return Err(StoreError::PreconditionViolation(format!(
                        "row '{}' is deleted; tombstones may not be edited",
                        input.row_id
                    )));
                }
                row.sync_state = match row.sync_state {
                    SyncState::NewRow => SyncState::NewRow,
                    _ => SyncState::Changed,
                };
                row.values.extend(input.values);
                row.savepoint_type = Some(SavepointType::Complete);
                row.savepoint_timestamp =
                    input.savepoint_timestamp.unwrap_or_default();
                row.savepoint_creator = input.savepoint_creator;
                if input.form_id.is_some() {
                    row.form_id = input.form_id;
                }
                if input.locale.is_some() {
                    row.locale = input.locale;
                }
                Ok(())
            }
            Some(RowPresence::Conflicted { .. }) => Err(StoreError::RowInConflict {
                table_id: table_id.to_string(),
                row_id: input.row_id,
            }),
            None => Err(StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: input.row_id,
            }),
        }
    }

    /// Deletes a row: never-synced rows vanish, synced rows become
    /// tombstones retained until the server confirms the delete.
    pub fn delete_row(&mut self, table_id: &str, row_id: &str) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        match &mut record.presence {
            Some(RowPresence::Simple(row)) => {
                table.open_checkpoints -= record.checkpoints.len();
                record.checkpoints.clear();
                if row.sync_state == SyncState::NewRow {
                    table.rows.remove(row_id);
                } else {
                    row.sync_state = SyncState::Deleted;
                }
                Ok(())
            }
            Some(RowPresence::Conflicted { .. }) => Err(StoreError::RowInConflict {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            }),
            None => {
                // Checkpoint-only record: discard it entirely.
                table.open_checkpoints -= record.checkpoints.len();
                table.rows.remove(row_id);
                Ok(())
            }
        }
    }

    /// Appends an open checkpoint frame (a full snapshot of the supplied
    /// values). Each call appends one frame, even with identical content.
    pub fn insert_checkpoint(&mut self, table_id: &str, input: RowInput) -> StoreResult<()> {
        validate_input(&input)?;
        self.validate_columns(table_id, &input)?;
        let table = self.table_mut(table_id)?;
        let row_id = input.row_id.clone();
        if let Some(RowPresence::Conflicted { .. }) =
            table.rows.get(&row_id).and_then(|r| r.presence.as_ref())
        {
            return Err(StoreError::RowInConflict {
                table_id: table_id.to_string(),
                row_id,
            });
        }
        let base_state = table
            .rows
            .get(&row_id)
            .and_then(|r| r.presence.as_ref())
            .map(|p| match p {
                RowPresence::Simple(row) => row.sync_state,
                RowPresence::Conflicted { .. } => unreachable!("checked above"),
            })
            .unwrap_or(SyncState::NewRow);
        let frame = build_row(input, base_state, None);
        table.rows.entry(row_id).or_default().checkpoints.push(frame);
        table.open_checkpoints += 1;
        Ok(())
    }

    /// Finalizes the newest checkpoint with the given savepoint type,
    /// collapsing the stack into the row's current revision.
    pub fn finalize_checkpoint(
        &mut self,
        table_id: &str,
        row_id: &str,
        savepoint_type: SavepointType,
    ) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        let mut newest = record.checkpoints.pop().ok_or_else(|| StoreError::NoCheckpoint {
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
        })?;
        table.open_checkpoints -= 1 + record.checkpoints.len();
        record.checkpoints.clear();

        newest.savepoint_type = Some(savepoint_type);
        newest.sync_state = match &record.presence {
            Some(RowPresence::Simple(base)) => {
                newest.row_etag = base.row_etag.clone();
                match base.sync_state {
                    SyncState::NewRow => SyncState::NewRow,
                    _ => SyncState::Changed,
                }
            }
            _ => SyncState::NewRow,
        };
        record.presence = Some(RowPresence::Simple(newest));
        debug!(table_id, row_id, "finalized checkpoint");
        Ok(())
    }

    /// Pops the newest checkpoint frame, restoring the prior revision.
    /// Removes the row entirely when no base revision existed.
    pub fn delete_last_checkpoint(&mut self, table_id: &str, row_id: &str) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        if record.checkpoints.pop().is_none() {
            return Err(StoreError::NoCheckpoint {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            });
        }
        table.open_checkpoints -= 1;
        if record.is_empty() {
            table.rows.remove(row_id);
        }
        Ok(())
    }

    /// Places a row into conflict: both variants are written and the
    /// state flips atomically (the enclosing transaction guarantees
    /// neither-or-both on failure).
    pub fn place_into_conflict(
        &mut self,
        table_id: &str,
        mut local: Row,
        mut server: Row,
        local_tag: ConflictType,
        server_tag: ConflictType,
    ) -> StoreResult<()> {
        if !local_tag.is_local() || !server_tag.is_server() {
            return Err(StoreError::Schema(ProtocolError::InvalidConflictPair {
                local: local_tag,
                server: server_tag,
            }));
        }
        if local.row_id != server.row_id {
            return Err(StoreError::PreconditionViolation(
                "conflict variants must share a row id".into(),
            ));
        }
        let row_id = local.row_id.clone();
        local.sync_state = SyncState::InConflict;
        local.conflict_type = Some(local_tag);
        server.sync_state = SyncState::InConflict;
        server.conflict_type = Some(server_tag);

        let table = self.table_mut(table_id)?;
        let record = table.rows.entry(row_id.clone()).or_default();
        if matches!(record.presence, Some(RowPresence::Conflicted { .. })) {
            return Err(StoreError::RowInConflict {
                table_id: table_id.to_string(),
                row_id,
            });
        }
        record.presence = Some(RowPresence::Conflicted { local, server });
        table.conflicts += 1;
        debug!(table_id, row_id, ?local_tag, ?server_tag, "row placed into conflict");
        Ok(())
    }

    /// Resolves a conflict keeping the local values.
    ///
    /// The surviving row adopts the server's row ETag so the next push
    /// races against current server state; when the server side was a
    /// delete, the row reverts to `new_row` (the server no longer has it).
    pub fn resolve_conflict_take_local(&mut self, table_id: &str, row_id: &str) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        match record.presence.take() {
            Some(RowPresence::Conflicted { mut local, server }) => {
                let server_deleted =
                    server.conflict_type == Some(ConflictType::ServerDeletedOldValues);
                local.conflict_type = None;
                if server_deleted {
                    local.sync_state = SyncState::NewRow;
                    local.row_etag = None;
                } else {
                    local.sync_state = SyncState::Changed;
                    local.row_etag = server.row_etag;
                }
                record.presence = Some(RowPresence::Simple(local));
                table.conflicts -= 1;
                Ok(())
            }
            other => {
                record.presence = other;
                Err(StoreError::RowNotInConflict {
                    table_id: table_id.to_string(),
                    row_id: row_id.to_string(),
                })
            }
        }
    }

    /// Resolves a conflict keeping the server values (merge direction).
    ///
    /// A server delete removes the row; otherwise the row lands in
    /// `synced_pending_files` when the table carries attachment columns,
    /// `synced` otherwise.
    pub fn resolve_conflict_take_server(&mut self, table_id: &str, row_id: &str) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let pending_files = table.definition.has_attachment_columns();
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        match record.presence.take() {
            Some(RowPresence::Conflicted { local: _, mut server }) => {
                table.conflicts -= 1;
                if server.conflict_type == Some(ConflictType::ServerDeletedOldValues) {
                    // The removed record may still hold checkpoint frames
                    // from before the conflict; release them from the count.
                    if let Some(record) = table.rows.remove(row_id) {
                        table.open_checkpoints -= record.checkpoints.len();
                    }
                } else {
                    server.conflict_type = None;
                    server.sync_state = if pending_files {
                        SyncState::SyncedPendingFiles
                    } else {
                        SyncState::Synced
                    };
                    record.presence = Some(RowPresence::Simple(server));
                }
                Ok(())
            }
            other => {
                record.presence = other;
                Err(StoreError::RowNotInConflict {
                    table_id: table_id.to_string(),
                    row_id: row_id.to_string(),
                })
            }
        }
    }

    /// Writes a server-authored row over whatever simple presence exists.
    /// Used when applying change-set pages.
    pub fn put_server_row(&mut self, table_id: &str, row: Row) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table.rows.entry(row.row_id.clone()).or_default();
        if matches!(record.presence, Some(RowPresence::Conflicted { .. })) {
            return Err(StoreError::RowInConflict {
                table_id: table_id.to_string(),
                row_id: row.row_id,
            });
        }
        record.presence = Some(RowPresence::Simple(row));
        Ok(())
    }

    /// Removes a row outright (server-confirmed delete or server-side
    /// removal of a clean row).
    pub fn remove_row(&mut self, table_id: &str, row_id: &str) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        if let Some(record) = table.rows.remove(row_id) {
            table.open_checkpoints -= record.checkpoints.len();
            if matches!(record.presence, Some(RowPresence::Conflicted { .. })) {
                table.conflicts -= 1;
            }
        }
        Ok(())
    }

    /// Records a successful push of a row: adopts the server ETag and
    /// advances to `synced` (or `synced_pending_files`).
    pub fn mark_synced(
        &mut self,
        table_id: &str,
        row_id: &str,
        row_etag: String,
        pending_files: bool,
    ) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        match &mut record.presence {
            Some(RowPresence::Simple(row)) => {
                row.row_etag = Some(row_etag);
                row.sync_state = if pending_files {
                    SyncState::SyncedPendingFiles
                } else {
                    SyncState::Synced
                };
                Ok(())
            }
            _ => Err(StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            }),
        }
    }

    /// Advances a row from `synced_pending_files` to `synced` once its
    /// attachments are fully reconciled. Idempotent for already-synced rows.
    pub fn mark_attachments_synced(&mut self, table_id: &str, row_id: &str) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        let record = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::RowNotFound {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            })?;
        if let Some(RowPresence::Simple(row)) = &mut record.presence {
            if row.sync_state == SyncState::SyncedPendingFiles {
                row.sync_state = SyncState::Synced;
            }
        }
        Ok(())
    }
}

impl TableStore {
    /// Fetches a row's presence (and all variants if conflicted).
    pub fn row(&self, table_id: &str, row_id: &str) -> Option<RowPresence> {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .and_then(|t| t.rows.get(row_id))
                .and_then(|r| r.presence.clone())
        })
    }

    /// Number of open checkpoint frames stacked on a row.
    pub fn checkpoint_depth(&self, table_id: &str, row_id: &str) -> usize {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .and_then(|t| t.rows.get(row_id))
                .map(|r| r.checkpoints.len())
                .unwrap_or(0)
        })
    }

    /// The newest open checkpoint frame for a row, if any.
    pub fn last_checkpoint(&self, table_id: &str, row_id: &str) -> Option<Row> {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .and_then(|t| t.rows.get(row_id))
                .and_then(|r| r.checkpoints.last().cloned())
        })
    }

    /// Derived table health, O(1) from maintained counters.
    pub fn table_health(&self, table_id: &str) -> StoreResult<TableHealth> {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .map(|t| TableHealth::from_counts(t.open_checkpoints, t.conflicts))
                .ok_or_else(|| StoreError::TableNotFound {
                    table_id: table_id.to_string(),
                })
        })
    }

    /// Rows awaiting push, plus a count of rows skipped because they
    /// still carry open checkpoints.
    pub fn rows_pending_push(&self, table_id: &str) -> (Vec<Row>, usize) {
        self.read(|inner| {
            let mut pending = Vec::new();
            let mut skipped = 0;
            if let Some(table) = inner.tables.get(table_id) {
                for record in table.rows.values() {
                    if let Some(RowPresence::Simple(row)) = &record.presence {
                        if row.sync_state.is_pending_push() {
                            if record.checkpoints.is_empty() {
                                pending.push(row.clone());
                            } else {
                                skipped += 1;
                            }
                        }
                    }
                }
            }
            (pending, skipped)
        })
    }

    /// Rows whose attachments still need reconciling.
    pub fn rows_pending_attachments(&self, table_id: &str) -> Vec<Row> {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .map(|table| {
                    table
                        .rows
                        .values()
                        .filter_map(|r| match &r.presence {
                            Some(RowPresence::Simple(row))
                                if row.sync_state == SyncState::SyncedPendingFiles =>
                            {
                                Some(row.clone())
                            }
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}
