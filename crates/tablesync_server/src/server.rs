//! The in-process reference server.

use crate::state::{ServerState, ServerTable};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tablesync_engine::{
    AttachmentFile, ManifestOutcome, ManifestScope, SyncError, SyncResult, Synchronizer,
};
use tablesync_protocol::{
    AlterRowsRequest, AlterRowsResponse, ChangeSetPage, FileManifestDocument, OutcomeType,
    RowOutcome, TableDefinition, TableResource,
};
use tracing::debug;

/// An in-process sync server.
///
/// Implements the client's [`Synchronizer`] contract directly, so full
/// client/server interactions run in one process without network I/O.
/// Failure-injection knobs make error paths reachable from tests.
#[derive(Default)]
pub struct InProcessServer {
    state: Mutex<ServerState>,
    fail_auth: AtomicBool,
    fail_next: AtomicUsize,
    reject_all_rows: AtomicBool,
    page_size: AtomicUsize,
}

impl InProcessServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self {
            page_size: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }
    }

    /// Makes every subsequent request fail authentication.
    pub fn set_fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    /// Fails the next `n` requests with a retryable transport error.
    pub fn fail_next_requests(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Rejects every pushed row as stale, regardless of its ETag.
    pub fn set_reject_all_rows(&self, reject: bool) {
        self.reject_all_rows.store(reject, Ordering::SeqCst);
    }

    /// Caps change-set pages at `n` rows, forcing resume cursors.
    pub fn set_page_size(&self, n: usize) {
        self.page_size.store(n.max(1), Ordering::SeqCst);
    }

    /// Authors a row change directly on the server, as another client's
    /// accepted push would. Returns the assigned row ETag.
    pub fn seed_row(&self, table_id: &str, change: &tablesync_protocol::RowChange) -> SyncResult<String> {
        let mut state = self.state.lock();
        let table = table_mut(&mut state, table_id)?;
        Ok(table.apply_change(change))
    }

    /// Current server row ETag, `None` for absent or deleted rows.
    pub fn row_etag(&self, table_id: &str, row_id: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .tables
            .get(table_id)?
            .rows
            .get(row_id)
            .filter(|r| !r.resource.deleted)
            .map(|r| r.resource.row_etag.clone())
    }

    /// Stores a configuration file directly, as an administrator upload.
    pub fn put_config_file(&self, scope: &ManifestScope, relative_path: &str, content: &[u8]) {
        self.state.lock().config_files.insert(
            (scope.cache_key(), relative_path.to_string()),
            content.to_vec(),
        );
    }

    /// Returns a stored attachment's content.
    pub fn attachment(&self, table_id: &str, row_id: &str, relative_path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .attachments
            .get(&(
                table_id.to_string(),
                row_id.to_string(),
                relative_path.to_string(),
            ))
            .cloned()
    }

    /// Stores an attachment directly, as another client's upload.
    pub fn put_attachment(&self, table_id: &str, row_id: &str, relative_path: &str, content: &[u8]) {
        self.state.lock().attachments.insert(
            (
                table_id.to_string(),
                row_id.to_string(),
                relative_path.to_string(),
            ),
            content.to_vec(),
        );
    }

    fn gate(&self) -> SyncResult<()> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::transport_retryable("injected transport failure"));
        }
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(SyncError::AuthenticationFailed("injected auth failure".into()));
        }
        Ok(())
    }
}

fn table_mut<'a>(state: &'a mut ServerState, table_id: &str) -> SyncResult<&'a mut ServerTable> {
    state
        .tables
        .get_mut(table_id)
        .ok_or_else(|| SyncError::ServerError(format!("no such table: {table_id}")))
}

impl Synchronizer for InProcessServer {
    fn list_tables(&self) -> SyncResult<Vec<TableResource>> {
        self.gate()?;
        let state = self.state.lock();
        Ok(state
            .tables
            .values()
            .map(|t| TableResource {
                table_id: t.definition.table_id.clone(),
                schema_etag: t.schema_etag.clone(),
                data_etag: t.data_etag(),
            })
            .collect())
    }

    fn get_table_definition(&self, table_id: &str) -> SyncResult<TableDefinition> {
        self.gate()?;
        let state = self.state.lock();
        state
            .tables
            .get(table_id)
            .map(|t| t.definition.clone())
            .ok_or_else(|| SyncError::ServerError(format!("no such table: {table_id}")))
    }

    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableResource> {
        self.gate()?;
        let mut state = self.state.lock();
        if state.tables.contains_key(&definition.table_id) {
            return Err(SyncError::ServerError(format!(
                "table already exists: {}",
                definition.table_id
            )));
        }
        let schema_etag = uuid::Uuid::new_v4().to_string();
        let table = ServerTable::new(definition.clone(), schema_etag.clone());
        let resource = TableResource {
            table_id: definition.table_id.clone(),
            schema_etag,
            data_etag: None,
        };
        state.tables.insert(definition.table_id.clone(), table);
        debug!(table_id = %definition.table_id, "table created");
        Ok(resource)
    }

    fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        self.gate()?;
        let mut state = self.state.lock();
        state.tables.remove(table_id);
        state.attachments.retain(|(t, _, _), _| t != table_id);
        let scope = ManifestScope::Table(table_id.to_string()).cache_key();
        state.config_files.retain(|(s, _), _| s != &scope);
        Ok(())
    }

    fn get_manifest(
        &self,
        scope: &ManifestScope,
        cached_etag: Option<&str>,
    ) -> SyncResult<ManifestOutcome> {
        self.gate()?;
        let state = self.state.lock();
        let key = scope.cache_key();
        let manifest = ServerState::build_manifest(
            state
                .config_files
                .iter()
                .filter(|((s, _), _)| s == &key)
                .map(|((_, p), c)| (p, c)),
        );
        if cached_etag.is_some() && cached_etag == manifest.manifest_etag.as_deref() {
            return Ok(ManifestOutcome::NotModified);
        }
        Ok(ManifestOutcome::Changed(manifest))
    }

    fn download_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
    ) -> SyncResult<Vec<u8>> {
        self.gate()?;
        self.state
            .lock()
            .config_files
            .get(&(scope.cache_key(), relative_path.to_string()))
            .cloned()
            .ok_or_else(|| SyncError::ServerError(format!("no such file: {relative_path}")))
    }

    fn upload_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
        content: &[u8],
    ) -> SyncResult<()> {
        self.gate()?;
        self.put_config_file(scope, relative_path, content);
        Ok(())
    }

    fn delete_config_file(&self, scope: &ManifestScope, relative_path: &str) -> SyncResult<()> {
        self.gate()?;
        self.state
            .lock()
            .config_files
            .remove(&(scope.cache_key(), relative_path.to_string()));
        Ok(())
    }

    fn get_changes(
        &self,
        table_id: &str,
        data_etag: Option<&str>,
        cursor: Option<&str>,
    ) -> SyncResult<ChangeSetPage> {
        self.gate()?;
        let state = self.state.lock();
        let table = state
            .tables
            .get(table_id)
            .ok_or_else(|| SyncError::ServerError(format!("no such table: {table_id}")))?;

        let since = ServerTable::parse_data_etag(data_etag);
        let resume: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(since);

        let mut changed: Vec<_> = table
            .rows
            .values()
            .filter(|r| r.seq > resume)
            .collect();
        changed.sort_by_key(|r| r.seq);

        let page_size = self.page_size.load(Ordering::SeqCst);
        let has_more = changed.len() > page_size;
        changed.truncate(page_size);

        Ok(ChangeSetPage {
            web_safe_resume_cursor: if has_more {
                changed.last().map(|r| r.seq.to_string())
            } else {
                None
            },
            rows: changed.iter().map(|r| r.resource.clone()).collect(),
            data_etag: table.data_etag(),
            has_more,
        })
    }

    fn alter_rows(
        &self,
        table_id: &str,
        request: &AlterRowsRequest,
    ) -> SyncResult<AlterRowsResponse> {
        self.gate()?;
        let reject_all = self.reject_all_rows.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        let table = table_mut(&mut state, table_id)?;

        let mut outcomes = Vec::with_capacity(request.rows.len());
        for change in &request.rows {
            let existing = table.rows.get(&change.row_id);
            let current_etag = existing
                .filter(|r| !r.resource.deleted)
                .map(|r| r.resource.row_etag.clone());

            // Optimistic concurrency: the presented ETag must match the
            // server's current one (both absent counts as a match). A
            // change carrying no ETag against an existing row was never
            // synced, so there is no stale version to conflict with.
            if reject_all || change.row_etag != current_etag {
                let outcome = if !reject_all && change.row_etag.is_none() {
                    OutcomeType::Denied
                } else {
                    OutcomeType::InConflict
                };
                outcomes.push(RowOutcome {
                    row_id: change.row_id.clone(),
                    outcome,
                    row_etag: current_etag,
                    deleted: existing.is_some_and(|r| r.resource.deleted),
                });
                continue;
            }

            if change.deleted && current_etag.is_none() {
                // Deleting what is not there: confirm without a change.
                outcomes.push(RowOutcome {
                    row_id: change.row_id.clone(),
                    outcome: OutcomeType::Success,
                    row_etag: None,
                    deleted: true,
                });
                continue;
            }

            let row_etag = table.apply_change(change);
            outcomes.push(RowOutcome {
                row_id: change.row_id.clone(),
                outcome: OutcomeType::Success,
                row_etag: if change.deleted { None } else { Some(row_etag) },
                deleted: change.deleted,
            });
        }

        Ok(AlterRowsResponse {
            outcomes,
            new_data_etag: table.data_etag(),
            table_level_failure: false,
        })
    }

    fn get_attachment_manifest(
        &self,
        table_id: &str,
        row_id: &str,
    ) -> SyncResult<FileManifestDocument> {
        self.gate()?;
        let state = self.state.lock();
        let paths: Vec<(String, Vec<u8>)> = state
            .attachments
            .iter()
            .filter(|((t, r, _), _)| t == table_id && r == row_id)
            .map(|((_, _, p), c)| (p.clone(), c.clone()))
            .collect();
        Ok(ServerState::build_manifest(
            paths.iter().map(|(p, c)| (p, c)),
        ))
    }

    fn download_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        relative_paths: &[String],
    ) -> SyncResult<Vec<AttachmentFile>> {
        self.gate()?;
        let state = self.state.lock();
        relative_paths
            .iter()
            .map(|path| {
                state
                    .attachments
                    .get(&(table_id.to_string(), row_id.to_string(), path.clone()))
                    .map(|content| AttachmentFile {
                        relative_path: path.clone(),
                        content: content.clone(),
                    })
                    .ok_or_else(|| {
                        SyncError::ServerError(format!("no such attachment: {path}"))
                    })
            })
            .collect()
    }

    fn upload_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        files: &[AttachmentFile],
    ) -> SyncResult<()> {
        self.gate()?;
        let mut state = self.state.lock();
        for file in files {
            let key = (
                table_id.to_string(),
                row_id.to_string(),
                file.relative_path.clone(),
            );
            // Attachments are immutable: a re-upload must carry the same
            // content.
            if let Some(existing) = state.attachments.get(&key) {
                if existing != &file.content {
                    return Err(SyncError::ServerError(format!(
                        "attachment content differs on re-upload: {}",
                        file.relative_path
                    )));
                }
                continue;
            }
            state.attachments.insert(key, file.content.clone());
        }
        Ok(())
    }
}
