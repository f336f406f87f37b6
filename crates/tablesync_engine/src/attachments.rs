//! Row attachment transfer.
//!
//! Attachments are immutable once synced: a path's content never changes
//! server-side, so reconciliation only ever fills gaps (upload what the
//! server lacks, download what we lack). A hash disagreement on a path
//! both sides already have is a protocol violation, not a conflict.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::files::{content_hash, FileStore};
use crate::planner::plan_batches;
use crate::transport::{AttachmentFile, Synchronizer};
use tablesync_protocol::{FileManifestEntry, Row};
use tablesync_store::{row_scope, TableStore, TransactionKind};
use tracing::{debug, warn};

/// Counters for an attachment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentOutcome {
    /// Files uploaded.
    pub uploaded: usize,
    /// Files downloaded.
    pub downloaded: usize,
    /// Rows whose attachments are now fully reconciled.
    pub rows_completed: usize,
}

/// Reconciles attachments for every row pending them in one table.
pub fn sync_table_attachments(
    store: &TableStore,
    files: &dyn FileStore,
    sync: &dyn Synchronizer,
    config: &SyncConfig,
    table_id: &str,
) -> SyncResult<AttachmentOutcome> {
    let mut outcome = AttachmentOutcome::default();
    for row in store.rows_pending_attachments(table_id) {
        match sync_row_attachments(store, files, sync, config, table_id, &row) {
            Ok(row_outcome) => {
                outcome.uploaded += row_outcome.uploaded;
                outcome.downloaded += row_outcome.downloaded;
                outcome.rows_completed += row_outcome.rows_completed;
            }
            // One row's bad attachment state must not strand the rest of
            // the table; the row simply stays pending.
            Err(e @ SyncError::AttachmentImmutabilityViolation { .. }) => {
                warn!(table_id, row_id = %row.row_id, error = %e, "attachment pass skipped row");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}

/// Reconciles one row's attachments. The row leaves
/// `synced_pending_files` only when every gap has been filled.
pub fn sync_row_attachments(
    store: &TableStore,
    files: &dyn FileStore,
    sync: &dyn Synchronizer,
    config: &SyncConfig,
    table_id: &str,
    row: &Row,
) -> SyncResult<AttachmentOutcome> {
    let scope = row_scope(table_id, &row.row_id);
    let mut outcome = AttachmentOutcome::default();

    let manifest = sync.get_attachment_manifest(table_id, &row.row_id)?;
    let local = files.list(&scope)?;

    // Immutability check before any transfer.
    for entry in &manifest.entries {
        if entry.is_placeholder() {
            continue;
        }
        if let Some(existing) = local.iter().find(|l| l.relative_path == entry.relative_path) {
            if existing.content_hash != entry.content_hash {
                return Err(SyncError::AttachmentImmutabilityViolation {
                    row_id: row.row_id.clone(),
                    relative_path: entry.relative_path.clone(),
                });
            }
        }
    }

    let to_download: Vec<FileManifestEntry> = manifest
        .entries
        .iter()
        .filter(|e| !e.is_placeholder())
        .filter(|e| !local.iter().any(|l| l.relative_path == e.relative_path))
        .cloned()
        .collect();
    let to_upload: Vec<FileManifestEntry> = local
        .iter()
        .filter(|l| manifest.find(&l.relative_path).is_none())
        .cloned()
        .collect();

    for batch in plan_batches(&to_upload, config.max_batch_size) {
        let mut payload = Vec::with_capacity(batch.relative_paths.len());
        for path in &batch.relative_paths {
            let content = files.read(&scope, path)?.ok_or_else(|| {
                SyncError::FileStorage(format!("attachment disappeared during sync: {path}"))
            })?;
            payload.push(AttachmentFile {
                relative_path: path.clone(),
                content,
            });
        }
        sync.upload_attachments(table_id, &row.row_id, &payload)?;
        outcome.uploaded += payload.len();
        debug!(table_id, row_id = %row.row_id, files = payload.len(), bytes = batch.total_bytes, "uploaded attachment batch");
    }

    for batch in plan_batches(&to_download, config.max_batch_size) {
        let fetched = sync.download_attachments(table_id, &row.row_id, &batch.relative_paths)?;
        for file in &fetched {
            let expected = manifest.find(&file.relative_path).ok_or_else(|| {
                SyncError::Protocol(format!(
                    "server sent unrequested attachment {}",
                    file.relative_path
                ))
            })?;
            if content_hash(&file.content) != expected.content_hash {
                return Err(SyncError::AttachmentImmutabilityViolation {
                    row_id: row.row_id.clone(),
                    relative_path: file.relative_path.clone(),
                });
            }
            files.write(&scope, &file.relative_path, &file.content)?;
        }
        outcome.downloaded += fetched.len();
    }

    // Everything reconciled: record hashes, remember the manifest, and
    // let the row leave synced_pending_files.
    store.transaction(TransactionKind::Exclusive, |txn| {
        for entry in &manifest.entries {
            if !entry.is_placeholder() {
                txn.put_file_etag(&scope, &entry.relative_path, &entry.content_hash);
            }
        }
        for entry in &to_upload {
            txn.put_file_etag(&scope, &entry.relative_path, &entry.content_hash);
        }
        if let Some(etag) = &manifest.manifest_etag {
            txn.put_manifest_etag(&scope, etag);
        }
        txn.mark_attachments_synced(table_id, &row.row_id)
    })?;
    outcome.rows_completed += 1;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryFileStore;
    use crate::transport::{ManifestOutcome, ManifestScope, MockSynchronizer, Synchronizer};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tablesync_protocol::{
        ColumnDefinition, ColumnType, FileManifestDocument, SyncState, TableDefinition,
    };
    use tablesync_store::{RowInput, RowPresence};

    /// Mock with per-row attachment manifests and recorded transfers.
    #[derive(Default)]
    struct AttachmentMock {
        inner: MockSynchronizer,
        manifests: Mutex<BTreeMap<String, FileManifestDocument>>,
        server_files: Mutex<BTreeMap<String, Vec<u8>>>,
        uploads: Mutex<Vec<String>>,
    }

    impl AttachmentMock {
        fn set_row_manifest(&self, row_id: &str, manifest: FileManifestDocument) {
            self.manifests.lock().insert(row_id.to_string(), manifest);
        }

        fn set_server_file(&self, path: &str, content: &[u8]) {
            self.server_files
                .lock()
                .insert(path.to_string(), content.to_vec());
        }
    }

    impl Synchronizer for AttachmentMock {
        fn list_tables(&self) -> SyncResult<Vec<tablesync_protocol::TableResource>> {
            self.inner.list_tables()
        }
        fn get_table_definition(&self, table_id: &str) -> SyncResult<TableDefinition> {
            self.inner.get_table_definition(table_id)
        }
        fn create_table(
            &self,
            definition: &TableDefinition,
        ) -> SyncResult<tablesync_protocol::TableResource> {
            self.inner.create_table(definition)
        }
        fn delete_table(&self, table_id: &str) -> SyncResult<()> {
            self.inner.delete_table(table_id)
        }
        fn get_manifest(
            &self,
            scope: &ManifestScope,
            cached_etag: Option<&str>,
        ) -> SyncResult<ManifestOutcome> {
            self.inner.get_manifest(scope, cached_etag)
        }
        fn download_config_file(
            &self,
            scope: &ManifestScope,
            relative_path: &str,
        ) -> SyncResult<Vec<u8>> {
            self.inner.download_config_file(scope, relative_path)
        }
        fn upload_config_file(
            &self,
            scope: &ManifestScope,
            relative_path: &str,
            content: &[u8],
        ) -> SyncResult<()> {
            self.inner.upload_config_file(scope, relative_path, content)
        }
        fn delete_config_file(
            &self,
            scope: &ManifestScope,
            relative_path: &str,
        ) -> SyncResult<()> {
            self.inner.delete_config_file(scope, relative_path)
        }
        fn get_changes(
            &self,
            table_id: &str,
            data_etag: Option<&str>,
            cursor: Option<&str>,
        ) -> SyncResult<tablesync_protocol::ChangeSetPage> {
            self.inner.get_changes(table_id, data_etag, cursor)
        }
        fn alter_rows(
            &self,
            table_id: &str,
            request: &tablesync_protocol::AlterRowsRequest,
        ) -> SyncResult<tablesync_protocol::AlterRowsResponse> {
            self.inner.alter_rows(table_id, request)
        }
        fn get_attachment_manifest(
            &self,
            _table_id: &str,
            row_id: &str,
        ) -> SyncResult<FileManifestDocument> {
            Ok(self.manifests.lock().get(row_id).cloned().unwrap_or_default())
        }
        fn download_attachments(
            &self,
            _table_id: &str,
            _row_id: &str,
            relative_paths: &[String],
        ) -> SyncResult<Vec<AttachmentFile>> {
            let server = self.server_files.lock();
            relative_paths
                .iter()
                .map(|p| {
                    server
                        .get(p)
                        .map(|content| AttachmentFile {
                            relative_path: p.clone(),
                            content: content.clone(),
                        })
                        .ok_or_else(|| SyncError::Protocol(format!("no server file {p}")))
                })
                .collect()
        }
        fn upload_attachments(
            &self,
            _table_id: &str,
            _row_id: &str,
            files: &[AttachmentFile],
        ) -> SyncResult<()> {
            let mut uploads = self.uploads.lock();
            for f in files {
                uploads.push(f.relative_path.clone());
            }
            Ok(())
        }
    }

    fn store_with_pending_row() -> TableStore {
        let store = TableStore::new();
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(
                    TableDefinition::new(
                        "t",
                        vec![ColumnDefinition::new(
                            "photo",
                            "photo",
                            ColumnType::scalar("rowpath"),
                        )],
                    )
                    .unwrap(),
                )?;
                txn.insert_row(
                    "t",
                    RowInput::new("r1", "2026-01-01T00:00:00Z")
                        .with_value("photo", Some("photo.jpg".into())),
                )?;
                txn.mark_synced("t", "r1", "e1".into(), true)
            })
            .unwrap();
        store
    }

    fn config() -> SyncConfig {
        SyncConfig::new("default", "https://srv", "u")
    }

    #[test]
    fn downloads_missing_attachment_and_completes_row() {
        let store = store_with_pending_row();
        let files = MemoryFileStore::new();
        let mock = AttachmentMock::default();
        let content = b"jpegdata";
        mock.set_row_manifest(
            "r1",
            FileManifestDocument::new(
                vec![FileManifestEntry::new(
                    "photo.jpg",
                    content_hash(content),
                    content.len() as u64,
                )],
                Some("m1".into()),
            ),
        );
        mock.set_server_file("photo.jpg", content);

        let outcome = sync_table_attachments(&store, &files, &mock, &config(), "t").unwrap();
        assert_eq!(outcome.downloaded, 1);
        assert_eq!(outcome.rows_completed, 1);
        assert_eq!(
            files.read(&row_scope("t", "r1"), "photo.jpg").unwrap().unwrap(),
            content
        );
        match store.row("t", "r1").unwrap() {
            RowPresence::Simple(row) => assert_eq!(row.sync_state, SyncState::Synced),
            other => panic!("unexpected presence: {other:?}"),
        }
    }

    #[test]
    fn uploads_local_only_attachment() {
        let store = store_with_pending_row();
        let files = MemoryFileStore::new();
        files
            .write(&row_scope("t", "r1"), "photo.jpg", b"localjpeg")
            .unwrap();
        let mock = AttachmentMock::default();
        mock.set_row_manifest("r1", FileManifestDocument::new(vec![], Some("m1".into())));

        let outcome = sync_table_attachments(&store, &files, &mock, &config(), "t").unwrap();
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.rows_completed, 1);
        assert_eq!(*mock.uploads.lock(), vec!["photo.jpg".to_string()]);
    }

    #[test]
    fn hash_disagreement_strands_only_that_row() {
        let store = store_with_pending_row();
        // Second pending row in the same table.
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.insert_row(
                    "t",
                    RowInput::new("r2", "2026-01-01T00:00:00Z")
                        .with_value("photo", Some("p2.jpg".into())),
                )?;
                txn.mark_synced("t", "r2", "e2".into(), true)
            })
            .unwrap();

        let files = MemoryFileStore::new();
        files
            .write(&row_scope("t", "r1"), "photo.jpg", b"local-version")
            .unwrap();
        let mock = AttachmentMock::default();
        mock.set_row_manifest(
            "r1",
            FileManifestDocument::new(
                vec![FileManifestEntry::new("photo.jpg", "sha256:other", 13)],
                Some("m1".into()),
            ),
        );
        mock.set_row_manifest("r2", FileManifestDocument::new(vec![], Some("m2".into())));

        let outcome = sync_table_attachments(&store, &files, &mock, &config(), "t").unwrap();
        // r1 stays pending, r2 completes.
        assert_eq!(outcome.rows_completed, 1);
        match store.row("t", "r1").unwrap() {
            RowPresence::Simple(row) => {
                assert_eq!(row.sync_state, SyncState::SyncedPendingFiles)
            }
            other => panic!("unexpected presence: {other:?}"),
        }
    }

    #[test]
    fn corrupted_download_is_rejected() {
        let store = store_with_pending_row();
        let files = MemoryFileStore::new();
        let mock = AttachmentMock::default();
        mock.set_row_manifest(
            "r1",
            FileManifestDocument::new(
                vec![FileManifestEntry::new("photo.jpg", "sha256:expected", 4)],
                Some("m1".into()),
            ),
        );
        mock.set_server_file("photo.jpg", b"garbage");

        let row = match store.row("t", "r1").unwrap() {
            RowPresence::Simple(row) => row,
            other => panic!("unexpected presence: {other:?}"),
        };
        let err = sync_row_attachments(&store, &files, &mock, &config(), "t", &row).unwrap_err();
        assert!(matches!(
            err,
            SyncError::AttachmentImmutabilityViolation { .. }
        ));
        // Nothing was written locally.
        assert!(files.read(&row_scope("t", "r1"), "photo.jpg").unwrap().is_none());
    }

    #[test]
    fn placeholder_entries_are_ignored() {
        let store = store_with_pending_row();
        let files = MemoryFileStore::new();
        let mock = AttachmentMock::default();
        mock.set_row_manifest(
            "r1",
            FileManifestDocument::new(
                vec![FileManifestEntry::new("pending-upload.jpg", "", 0)],
                Some("m1".into()),
            ),
        );

        let outcome = sync_table_attachments(&store, &files, &mock, &config(), "t").unwrap();
        assert_eq!(outcome.downloaded, 0);
        assert_eq!(outcome.rows_completed, 1);
    }
}
