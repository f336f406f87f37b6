//! Table metadata, key-value store entries, and the server-ETag cache.
//!
//! The ETag cache remembers, per manifest scope, the last manifest ETag
//! the server reported and the last known content hash of each file. The
//! engine uses it to short-circuit unchanged manifests and to skip
//! re-uploads and re-downloads of unchanged files.

use crate::error::{StoreError, StoreResult};
use crate::store::{TableStore, Transaction};
use tablesync_protocol::KeyValueStoreEntry;

/// Manifest scope for app-level configuration files.
pub fn app_scope() -> String {
    "app".to_string()
}

/// Manifest scope for one table's configuration files.
pub fn table_scope(table_id: &str) -> String {
    format!("table/{table_id}")
}

/// Manifest scope for one row's attachments.
pub fn row_scope(table_id: &str, row_id: &str) -> String {
    format!("row/{table_id}/{row_id}")
}

impl Transaction<'_> {
    /// Replaces a table's definition with one carrying a new schemaETag.
    /// Rows are untouched; the caller decides separately what a schema
    /// change means for them.
    pub fn set_schema_etag(&mut self, table_id: &str, schema_etag: Option<String>) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        table.definition.schema_etag = schema_etag;
        Ok(())
    }

    /// Records the dataETag as of the last accepted change-set.
    pub fn set_last_data_etag(&mut self, table_id: &str, data_etag: Option<String>) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        table.last_data_etag = data_etag;
        Ok(())
    }

    /// Records when this table last completed a sync pass.
    pub fn set_last_sync_time(&mut self, table_id: &str, when: impl Into<String>) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        table.last_sync_time = Some(when.into());
        Ok(())
    }

    /// Upserts a key-value entry, coercing recognized entry types to
    /// their canonical type first.
    pub fn put_kvs_entry(&mut self, mut entry: KeyValueStoreEntry) -> StoreResult<()> {
        entry.enforce_entry_type();
        let table = self.table_mut(&entry.table_id.clone())?;
        table.kvs.insert(
            (entry.partition.clone(), entry.aspect.clone(), entry.key.clone()),
            entry,
        );
        Ok(())
    }

    /// Removes a key-value entry if present.
    pub fn delete_kvs_entry(
        &mut self,
        table_id: &str,
        partition: &str,
        aspect: &str,
        key: &str,
    ) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        table
            .kvs
            .remove(&(partition.to_string(), aspect.to_string(), key.to_string()));
        Ok(())
    }

    /// Replaces all key-value entries for a table with the given set.
    /// Used when applying a freshly downloaded properties file.
    pub fn replace_kvs(&mut self, table_id: &str, entries: Vec<KeyValueStoreEntry>) -> StoreResult<()> {
        let table = self.table_mut(table_id)?;
        table.kvs.clear();
        for mut entry in entries {
            if entry.table_id != table_id {
                return Err(StoreError::PreconditionViolation(format!(
                    "key-value entry for table '{}' supplied to table '{table_id}'",
                    entry.table_id
                )));
            }
            entry.enforce_entry_type();
            table.kvs.insert(
                (entry.partition.clone(), entry.aspect.clone(), entry.key.clone()),
                entry,
            );
        }
        Ok(())
    }

    /// Records the server's content hash for a file within a scope.
    pub fn put_file_etag(&mut self, scope: &str, relative_path: &str, content_hash: &str) {
        self.inner
            .file_etags
            .insert((scope.to_string(), relative_path.to_string()), content_hash.to_string());
    }

    /// Forgets a file's cached hash (it no longer exists server-side).
    pub fn remove_file_etag(&mut self, scope: &str, relative_path: &str) {
        self.inner
            .file_etags
            .remove(&(scope.to_string(), relative_path.to_string()));
    }

    /// Records the manifest ETag last seen for a scope.
    pub fn put_manifest_etag(&mut self, scope: &str, manifest_etag: &str) {
        self.inner
            .manifest_etags
            .insert(scope.to_string(), manifest_etag.to_string());
    }

    /// Drops every cached attachment ETag for a table.
    ///
    /// Called when a table's schemaETag changes: attachments live under a
    /// schema-qualified server path, so all cached hashes are suspect.
    pub fn invalidate_attachment_etags(&mut self, table_id: &str) {
        let prefix = format!("row/{table_id}/");
        self.inner
            .file_etags
            .retain(|(scope, _), _| !scope.starts_with(&prefix));
        self.inner
            .manifest_etags
            .retain(|scope, _| !scope.starts_with(&prefix));
    }
}

impl TableStore {
    /// The dataETag as of the last accepted change-set, if any.
    pub fn last_data_etag(&self, table_id: &str) -> Option<String> {
        self.read(|inner| inner.tables.get(table_id).and_then(|t| t.last_data_etag.clone()))
    }

    /// When this table last completed a sync pass, if ever.
    pub fn last_sync_time(&self, table_id: &str) -> Option<String> {
        self.read(|inner| inner.tables.get(table_id).and_then(|t| t.last_sync_time.clone()))
    }

    /// Fetches a key-value entry.
    pub fn kvs_entry(
        &self,
        table_id: &str,
        partition: &str,
        aspect: &str,
        key: &str,
    ) -> Option<KeyValueStoreEntry> {
        self.read(|inner| {
            inner.tables.get(table_id).and_then(|t| {
                t.kvs
                    .get(&(partition.to_string(), aspect.to_string(), key.to_string()))
                    .cloned()
            })
        })
    }

    /// All key-value entries for a table, in (partition, aspect, key) order.
    pub fn kvs_entries(&self, table_id: &str) -> Vec<KeyValueStoreEntry> {
        self.read(|inner| {
            inner
                .tables
                .get(table_id)
                .map(|t| t.kvs.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Cached server content hash for a file, if known.
    pub fn file_etag(&self, scope: &str, relative_path: &str) -> Option<String> {
        self.read(|inner| {
            inner
                .file_etags
                .get(&(scope.to_string(), relative_path.to_string()))
                .cloned()
        })
    }

    /// Last manifest ETag seen for a scope, if any.
    pub fn manifest_etag(&self, scope: &str) -> Option<String> {
        self.read(|inner| inner.manifest_etags.get(scope).cloned())
    }
}
