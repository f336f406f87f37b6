//! Server-side table and file state.

use std::collections::BTreeMap;
use tablesync_engine::content_hash;
use tablesync_protocol::{
    FileManifestDocument, FileManifestEntry, RowChange, RowResource, TableDefinition,
};

/// One stored server row, including delete tombstones.
#[derive(Debug, Clone)]
pub(crate) struct ServerRow {
    pub resource: RowResource,
    /// Change sequence at last modification; orders the change feed.
    pub seq: u64,
}

/// One server-side table.
#[derive(Debug, Clone)]
pub(crate) struct ServerTable {
    pub definition: TableDefinition,
    pub schema_etag: String,
    /// Monotonic change counter; `0` means no accepted change-set yet.
    pub data_seq: u64,
    pub rows: BTreeMap<String, ServerRow>,
}

impl ServerTable {
    pub fn new(mut definition: TableDefinition, schema_etag: String) -> Self {
        definition.schema_etag = Some(schema_etag.clone());
        Self {
            definition,
            schema_etag,
            data_seq: 0,
            rows: BTreeMap::new(),
        }
    }

    pub fn data_etag(&self) -> Option<String> {
        if self.data_seq == 0 {
            None
        } else {
            Some(format!("d{}", self.data_seq))
        }
    }

    /// Applies one accepted mutation under a freshly bumped sequence.
    pub fn apply_change(&mut self, change: &RowChange) -> String {
        self.data_seq += 1;
        let row_etag = uuid::Uuid::new_v4().to_string();
        let resource = RowResource {
            row_id: change.row_id.clone(),
            row_etag: row_etag.clone(),
            deleted: change.deleted,
            values: change.values.clone(),
            savepoint_type: change.savepoint_type.clone(),
            savepoint_timestamp: change.savepoint_timestamp.clone(),
            savepoint_creator: change.savepoint_creator.clone(),
            scope: change.scope.clone(),
            form_id: change.form_id.clone(),
            locale: change.locale.clone(),
            data_etag_at_modification: Some(format!("d{}", self.data_seq)),
        };
        self.rows.insert(
            change.row_id.clone(),
            ServerRow {
                resource,
                seq: self.data_seq,
            },
        );
        row_etag
    }

    /// Parses one of this table's dataETags back to its sequence.
    pub fn parse_data_etag(etag: Option<&str>) -> u64 {
        etag.and_then(|e| e.strip_prefix('d'))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

/// Shared mutable server state.
#[derive(Debug, Default)]
pub(crate) struct ServerState {
    pub tables: BTreeMap<String, ServerTable>,
    /// Configuration files, keyed by (scope key, relative path).
    pub config_files: BTreeMap<(String, String), Vec<u8>>,
    /// Row attachments, keyed by (table, row, relative path).
    pub attachments: BTreeMap<(String, String, String), Vec<u8>>,
}

impl ServerState {
    /// Builds a manifest over a set of (path, content) pairs. The
    /// manifest ETag is derived from the listing, so equal listings
    /// produce equal ETags.
    pub fn build_manifest<'a>(
        files: impl Iterator<Item = (&'a String, &'a Vec<u8>)>,
    ) -> FileManifestDocument {
        let entries: Vec<FileManifestEntry> = files
            .map(|(path, content)| {
                FileManifestEntry::new(path.clone(), content_hash(content), content.len() as u64)
            })
            .collect();
        let mut fingerprint = String::new();
        for entry in &entries {
            fingerprint.push_str(&entry.relative_path);
            fingerprint.push('\n');
            fingerprint.push_str(&entry.content_hash);
            fingerprint.push('\n');
        }
        let manifest_etag = Some(content_hash(fingerprint.as_bytes()));
        FileManifestDocument::new(entries, manifest_etag)
    }
}
