//! Row model: sync states, conflict types, savepoint types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The synchronization lifecycle state of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Created locally, never pushed.
    NewRow,
    /// Locally modified since the last successful push.
    Changed,
    /// In agreement with the server, including attachments.
    Synced,
    /// Row content agrees with the server but file attachments may not.
    SyncedPendingFiles,
    /// Locally deleted; retained as a tombstone until the server confirms.
    Deleted,
    /// A push collided with concurrent server state; two variants exist.
    InConflict,
}

impl SyncState {
    /// Returns the stable wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::NewRow => "new_row",
            SyncState::Changed => "changed",
            SyncState::Synced => "synced",
            SyncState::SyncedPendingFiles => "synced_pending_files",
            SyncState::Deleted => "deleted",
            SyncState::InConflict => "in_conflict",
        }
    }

    /// Parses a stable wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "new_row" => Some(SyncState::NewRow),
            "changed" => Some(SyncState::Changed),
            "synced" => Some(SyncState::Synced),
            "synced_pending_files" => Some(SyncState::SyncedPendingFiles),
            "deleted" => Some(SyncState::Deleted),
            "in_conflict" => Some(SyncState::InConflict),
            _ => None,
        }
    }

    /// Returns true if the row has local content the server has not accepted.
    pub fn is_pending_push(&self) -> bool {
        matches!(
            self,
            SyncState::NewRow | SyncState::Changed | SyncState::Deleted
        )
    }
}

/// Distinguishes the four ways a push can collide with concurrent
/// server state. Exactly one local and one server value exist per
/// conflicted row; display ordering follows the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictType {
    /// The local edit was a delete; these are the pre-delete values.
    LocalDeletedOldValues,
    /// The local edit was an update; these are the updated values.
    LocalUpdatedUpdatedValues,
    /// The server change was a delete; these are the pre-delete values.
    ServerDeletedOldValues,
    /// The server change was an update; these are the updated values.
    ServerUpdatedUpdatedValues,
}

impl ConflictType {
    /// Converts to the stable integer code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictType::LocalDeletedOldValues => 1,
            ConflictType::LocalUpdatedUpdatedValues => 2,
            ConflictType::ServerDeletedOldValues => 3,
            ConflictType::ServerUpdatedUpdatedValues => 4,
        }
    }

    /// Converts from the stable integer code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictType::LocalDeletedOldValues),
            2 => Some(ConflictType::LocalUpdatedUpdatedValues),
            3 => Some(ConflictType::ServerDeletedOldValues),
            4 => Some(ConflictType::ServerUpdatedUpdatedValues),
            _ => None,
        }
    }

    /// Returns true for the client-authored variant tags.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ConflictType::LocalDeletedOldValues | ConflictType::LocalUpdatedUpdatedValues
        )
    }

    /// Returns true for the server-authored variant tags.
    pub fn is_server(&self) -> bool {
        !self.is_local()
    }

    /// The local tag for a local edit that was an update or a delete.
    pub fn local_for(deleted: bool) -> Self {
        if deleted {
            ConflictType::LocalDeletedOldValues
        } else {
            ConflictType::LocalUpdatedUpdatedValues
        }
    }

    /// The server tag for a server change that was an update or a delete.
    pub fn server_for(deleted: bool) -> Self {
        if deleted {
            ConflictType::ServerDeletedOldValues
        } else {
            ConflictType::ServerUpdatedUpdatedValues
        }
    }
}

/// Finality marker of a checkpointed revision. An open checkpoint carries
/// no savepoint type at all (`Option<SavepointType>` is `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavepointType {
    /// Finalized, but the form/editor marked it incomplete.
    Incomplete,
    /// Finalized as complete.
    Complete,
}

impl SavepointType {
    /// Returns the stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SavepointType::Incomplete => "incomplete",
            SavepointType::Complete => "complete",
        }
    }
}

/// Visibility scoping of a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Filter type (e.g. `DEFAULT`, `HIDDEN`, `GROUP_READ_ONLY`).
    pub filter_type: Option<String>,
    /// Filter value (e.g. a user or group identifier).
    pub filter_value: Option<String>,
}

/// A single physical row revision.
///
/// A row with `sync_state == InConflict` exists as exactly two variants
/// sharing the same `row_id` and differing by `conflict_type`; the store
/// enforces that pairing structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row identifier, unique within a table.
    pub row_id: String,
    /// Opaque version token assigned by the server; `None` until first push.
    pub row_etag: Option<String>,
    /// Lifecycle state.
    pub sync_state: SyncState,
    /// Conflict tag; present iff `sync_state == InConflict`.
    pub conflict_type: Option<ConflictType>,
    /// Finality of this revision; `None` only for open checkpoints.
    pub savepoint_type: Option<SavepointType>,
    /// When this revision was saved (RFC 3339).
    pub savepoint_timestamp: String,
    /// Who saved this revision.
    pub savepoint_creator: Option<String>,
    /// Visibility scoping.
    pub scope: Scope,
    /// The form that authored this revision, if any.
    pub form_id: Option<String>,
    /// Locale of the authoring session, if any.
    pub locale: Option<String>,
    /// User-defined column values, keyed by element key. Ordered.
    pub values: BTreeMap<String, Option<String>>,
}

impl Row {
    /// Checks the conflict-tagging invariant for this single variant.
    pub fn conflict_tag_consistent(&self) -> bool {
        self.conflict_type.is_some() == (self.sync_state == SyncState::InConflict)
    }
}
