//! Change-set paging and batched row-alteration messages.

use crate::row::{Scope, SyncState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row mutation sent from client to server inside an alter-rows batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// Row identifier.
    pub row_id: String,
    /// The row ETag the client last synced against; `None` for new rows.
    pub row_etag: Option<String>,
    /// True when this mutation deletes the row.
    pub deleted: bool,
    /// Column values; ignored for deletes.
    pub values: BTreeMap<String, Option<String>>,
    /// Finality marker name (`complete` / `incomplete`).
    pub savepoint_type: Option<String>,
    /// When the revision was saved.
    pub savepoint_timestamp: String,
    /// Who saved the revision.
    pub savepoint_creator: Option<String>,
    /// Visibility scoping.
    pub scope: Scope,
    /// Authoring form.
    pub form_id: Option<String>,
    /// Authoring locale.
    pub locale: Option<String>,
}

/// A row as reported by the server in a change-set page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowResource {
    /// Row identifier.
    pub row_id: String,
    /// Current server ETag for the row.
    pub row_etag: String,
    /// True when the server-side change was a delete.
    pub deleted: bool,
    /// Column values as of this change.
    pub values: BTreeMap<String, Option<String>>,
    /// Finality marker name.
    pub savepoint_type: Option<String>,
    /// When the revision was saved.
    pub savepoint_timestamp: String,
    /// Who saved the revision.
    pub savepoint_creator: Option<String>,
    /// Visibility scoping.
    pub scope: Scope,
    /// Authoring form.
    pub form_id: Option<String>,
    /// Authoring locale.
    pub locale: Option<String>,
    /// The table dataETag in effect when this change was accepted.
    pub data_etag_at_modification: Option<String>,
}

/// One page of a server change-set, resumable via an opaque cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetPage {
    /// Rows changed since the requested dataETag, in acceptance order.
    pub rows: Vec<RowResource>,
    /// The table's dataETag as of the end of this page.
    pub data_etag: Option<String>,
    /// Cursor to resume from; present iff `has_more`.
    pub web_safe_resume_cursor: Option<String>,
    /// Whether further pages exist.
    pub has_more: bool,
}

/// Per-row outcome of an alter-rows call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    /// The mutation was accepted; a new row ETag was assigned.
    Success,
    /// The caller is not permitted to change this row.
    Denied,
    /// The presented row ETag is no longer current on the server.
    InConflict,
    /// The server failed to process this row.
    Failed,
}

/// Outcome for one row in an alter-rows batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    /// Row identifier.
    pub row_id: String,
    /// Outcome classification.
    pub outcome: OutcomeType,
    /// The new row ETag on success; the server's current ETag on conflict.
    pub row_etag: Option<String>,
    /// True when the accepted mutation was a delete.
    pub deleted: bool,
}

/// A batch of row mutations plus the table dataETag the client expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterRowsRequest {
    /// The dataETag the client last recorded for the table.
    pub data_etag: Option<String>,
    /// Row mutations.
    pub rows: Vec<RowChange>,
}

/// Server response to an alter-rows batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterRowsResponse {
    /// Per-row outcomes, in request order.
    pub outcomes: Vec<RowOutcome>,
    /// The table dataETag after processing the batch.
    pub new_data_etag: Option<String>,
    /// True when the server rejected the batch as a whole.
    pub table_level_failure: bool,
}

impl AlterRowsResponse {
    /// Returns true if at least one row was unconditionally accepted.
    pub fn any_accepted(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.outcome == OutcomeType::Success)
    }

    /// Returns true when the recorded dataETag may advance to
    /// `new_data_etag`: some row was accepted and nothing failed
    /// table-wide.
    pub fn may_advance_data_etag(&self) -> bool {
        self.any_accepted() && !self.table_level_failure
    }
}

/// Converts a wire savepoint-type name to the row-model marker.
pub fn parse_savepoint_type(name: Option<&str>) -> Option<crate::SavepointType> {
    match name {
        Some("complete") => Some(crate::SavepointType::Complete),
        Some("incomplete") => Some(crate::SavepointType::Incomplete),
        _ => None,
    }
}

impl RowResource {
    /// Materializes this server row as a local row in the given state.
    pub fn to_local_row(&self, sync_state: SyncState) -> crate::Row {
        crate::Row {
            row_id: self.row_id.clone(),
            row_etag: Some(self.row_etag.clone()),
            sync_state,
            conflict_type: None,
            savepoint_type: parse_savepoint_type(self.savepoint_type.as_deref()),
            savepoint_timestamp: self.savepoint_timestamp.clone(),
            savepoint_creator: self.savepoint_creator.clone(),
            scope: self.scope.clone(),
            form_id: self.form_id.clone(),
            locale: self.locale.clone(),
            values: self.values.clone(),
        }
    }
}
