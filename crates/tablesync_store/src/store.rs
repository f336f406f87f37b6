//! The shared in-memory table store and its transaction boundary.
//!
//! The engine consumes the store through a narrow contract: row and
//! metadata CRUD inside a transaction, table enumeration, and ETag
//! reporting. A SQLite-backed store can replace this implementation
//! behind the same surface.

use crate::error::{StoreError, StoreResult};
use crate::lifecycle::RowRecord;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tablesync_protocol::{KeyValueStoreEntry, TableDefinition};

/// Transaction isolation kind.
///
/// The in-memory store serializes all transactions on one writer lock;
/// the kind is carried so call sites document their intent and a
/// file-backed store can honor the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Immediate exclusive writer.
    Exclusive,
    /// Deferred: reads may precede the first write.
    Deferred,
}

/// Per-table stored state.
#[derive(Debug, Clone)]
pub(crate) struct TableData {
    /// Column structure, including the schema epoch.
    pub definition: TableDefinition,
    /// Token for row content as of the last accepted change-set.
    pub last_data_etag: Option<String>,
    /// When this table last completed a sync.
    pub last_sync_time: Option<String>,
    /// Rows, keyed by row id. Ordered for deterministic iteration.
    pub rows: BTreeMap<String, RowRecord>,
    /// Key-value metadata, keyed by (partition, aspect, key).
    pub kvs: BTreeMap<(String, String, String), KeyValueStoreEntry>,
    /// Number of open checkpoint frames across all rows.
    pub open_checkpoints: usize,
    /// Number of rows currently in conflict.
    pub conflicts: usize,
}

impl TableData {
    fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            last_data_etag: None,
            last_sync_time: None,
            rows: BTreeMap::new(),
            kvs: BTreeMap::new(),
            open_checkpoints: 0,
            conflicts: 0,
        }
    }
}

/// Mutable store contents. Cloned at transaction begin for rollback.
#[derive(Debug, Clone, Default)]
pub(crate) struct Inner {
    pub tables: BTreeMap<String, TableData>,
    /// Last known server content hash per (scope, relative path).
    pub file_etags: HashMap<(String, String), String>,
    /// Last seen manifest ETag per scope.
    pub manifest_etags: HashMap<String, String>,
}

/// The shared local store.
#[derive(Debug, Default)]
pub struct TableStore {
    inner: Mutex<Inner>,
}

impl TableStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`; otherwise every change made by `f`
    /// is rolled back, so a failure (or crash) leaves the store in the
    /// pre-step state.
    pub fn transaction<R>(
        &self,
        kind: TransactionKind,
        f: impl FnOnce(&mut Transaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut guard = self.inner.lock();
        let snapshot = guard.clone();
        let mut txn = Transaction {
            inner: &mut guard,
            kind,
        };
        match f(&mut txn) {
            Ok(value) => Ok(value),
            Err(e) => {
                *guard = snapshot;
                Err(e)
            }
        }
    }

    /// Runs a read-only closure against a consistent view.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Enumerates table ids.
    pub fn list_table_ids(&self) -> Vec<String> {
        self.read(|inner| inner.tables.keys().cloned().collect())
    }

    /// Returns true if the table exists.
    pub fn has_table(&self, table_id: &str) -> bool {
        self.read(|inner| inner.tables.contains_key(table_id))
    }

    /// Fetches a table's definition (with its schemaETag).
    pub fn table_definition(&self, table_id: &str) -> StoreResult<TableDefinition> {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .map(|t| t.definition.clone())
                .ok_or_else(|| StoreError::TableNotFound {
                    table_id: table_id.to_string(),
                })
        })
    }
}

/// An open transaction over the store.
pub struct Transaction<'a> {
    pub(crate) inner: &'a mut Inner,
    kind: TransactionKind,
}

impl Transaction<'_> {
    /// The isolation kind this transaction was opened with.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Creates a table from a validated definition.
    pub fn create_table(&mut self, definition: TableDefinition) -> StoreResult<()> {
        let table_id = definition.table_id.clone();
        if self.inner.tables.contains_key(&table_id) {
            return Err(StoreError::TableExists { table_id });
        }
        self.inner.tables.insert(table_id, TableData::new(definition));
        Ok(())
    }

    /// Drops a table and all of its rows and metadata.
    pub fn drop_table(&mut self, table_id: &str) -> StoreResult<()> {
        self.inner
            .tables
            .remove(table_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound {
                table_id: table_id.to_string(),
            })
    }

    pub(crate) fn table_mut(&mut self, table_id: &str) -> StoreResult<&mut TableData> {
        self.inner
            .tables
            .get_mut(table_id)
            .ok_or_else(|| StoreError::TableNotFound {
                table_id: table_id.to_string(),
            })
    }
}
