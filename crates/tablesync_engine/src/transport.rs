//! Server transport abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use tablesync_protocol::{
    AlterRowsRequest, AlterRowsResponse, ChangeSetPage, FileManifestDocument, TableDefinition,
    TableResource,
};

/// A configuration-file manifest scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestScope {
    /// Application-level configuration files.
    App,
    /// One table's configuration files.
    Table(String),
}

impl ManifestScope {
    /// The store cache key for this scope.
    pub fn cache_key(&self) -> String {
        match self {
            ManifestScope::App => tablesync_store::app_scope(),
            ManifestScope::Table(table_id) => tablesync_store::table_scope(table_id),
        }
    }
}

/// Result of a conditional manifest fetch.
#[derive(Debug, Clone)]
pub enum ManifestOutcome {
    /// The server manifest matches the presented ETag; nothing to diff.
    NotModified,
    /// A changed (or unconditionally fetched) manifest.
    Changed(FileManifestDocument),
}

/// One attachment payload, addressed by its row-relative path.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentFile {
    /// Path relative to the row's attachment root.
    pub relative_path: String,
    /// File content.
    pub content: Vec<u8>,
}

/// A synchronizer handles all communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (REST over HTTP, in-process for testing, etc.).
pub trait Synchronizer: Send + Sync {
    /// Lists the tables the server exposes for this app.
    fn list_tables(&self) -> SyncResult<Vec<TableResource>>;

    /// Fetches a table's column structure.
    fn get_table_definition(&self, table_id: &str) -> SyncResult<TableDefinition>;

    /// Creates a table on the server, returning its assigned resource.
    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableResource>;

    /// Deletes a table on the server.
    fn delete_table(&self, table_id: &str) -> SyncResult<()>;

    /// Fetches a configuration-file manifest, short-circuiting via the
    /// presented ETag when the server supports it.
    fn get_manifest(
        &self,
        scope: &ManifestScope,
        cached_etag: Option<&str>,
    ) -> SyncResult<ManifestOutcome>;

    /// Downloads one configuration file.
    fn download_config_file(&self, scope: &ManifestScope, relative_path: &str)
        -> SyncResult<Vec<u8>>;

    /// Uploads one configuration file.
    fn upload_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
        content: &[u8],
    ) -> SyncResult<()>;

    /// Deletes one configuration file.
    fn delete_config_file(&self, scope: &ManifestScope, relative_path: &str) -> SyncResult<()>;

    /// Fetches one page of row changes since the given dataETag.
    fn get_changes(
        &self,
        table_id: &str,
        data_etag: Option<&str>,
        cursor: Option<&str>,
    ) -> SyncResult<ChangeSetPage>;

    /// Submits a batch of row mutations.
    fn alter_rows(
        &self,
        table_id: &str,
        request: &AlterRowsRequest,
    ) -> SyncResult<AlterRowsResponse>;

    /// Fetches the attachment manifest for one row.
    fn get_attachment_manifest(
        &self,
        table_id: &str,
        row_id: &str,
    ) -> SyncResult<FileManifestDocument>;

    /// Downloads a batch of row attachments.
    fn download_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        relative_paths: &[String],
    ) -> SyncResult<Vec<AttachmentFile>>;

    /// Uploads a batch of row attachments.
    fn upload_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        files: &[AttachmentFile],
    ) -> SyncResult<()>;
}

// Delegation so several clients can share one synchronizer.
impl<S: Synchronizer + ?Sized> Synchronizer for &S {
    fn list_tables(&self) -> SyncResult<Vec<TableResource>> {
        (**self).list_tables()
    }

    fn get_table_definition(&self, table_id: &str) -> SyncResult<TableDefinition> {
        (**self).get_table_definition(table_id)
    }

    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableResource> {
        (**self).create_table(definition)
    }

    fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        (**self).delete_table(table_id)
    }

    fn get_manifest(
        &self,
        scope: &ManifestScope,
        cached_etag: Option<&str>,
    ) -> SyncResult<ManifestOutcome> {
        (**self).get_manifest(scope, cached_etag)
    }

    fn download_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
    ) -> SyncResult<Vec<u8>> {
        (**self).download_config_file(scope, relative_path)
    }

    fn upload_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
        content: &[u8],
    ) -> SyncResult<()> {
        (**self).upload_config_file(scope, relative_path, content)
    }

    fn delete_config_file(&self, scope: &ManifestScope, relative_path: &str) -> SyncResult<()> {
        (**self).delete_config_file(scope, relative_path)
    }

    fn get_changes(
        &self,
        table_id: &str,
        data_etag: Option<&str>,
        cursor: Option<&str>,
    ) -> SyncResult<ChangeSetPage> {
        (**self).get_changes(table_id, data_etag, cursor)
    }

    fn alter_rows(
        &self,
        table_id: &str,
        request: &AlterRowsRequest,
    ) -> SyncResult<AlterRowsResponse> {
        (**self).alter_rows(table_id, request)
    }

    fn get_attachment_manifest(
        &self,
        table_id: &str,
        row_id: &str,
    ) -> SyncResult<FileManifestDocument> {
        (**self).get_attachment_manifest(table_id, row_id)
    }

    fn download_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        relative_paths: &[String],
    ) -> SyncResult<Vec<AttachmentFile>> {
        (**self).download_attachments(table_id, row_id, relative_paths)
    }

    fn upload_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        files: &[AttachmentFile],
    ) -> SyncResult<()> {
        (**self).upload_attachments(table_id, row_id, files)
    }
}

/// A mock synchronizer for unit tests.
#[derive(Default)]
pub struct MockSynchronizer {
    tables: parking_lot::Mutex<Vec<TableResource>>,
    definitions: parking_lot::Mutex<std::collections::HashMap<String, TableDefinition>>,
    manifests: parking_lot::Mutex<std::collections::HashMap<String, FileManifestDocument>>,
    change_pages: parking_lot::Mutex<std::collections::HashMap<String, Vec<ChangeSetPage>>>,
    alter_responses: parking_lot::Mutex<Vec<AlterRowsResponse>>,
    alter_requests: parking_lot::Mutex<Vec<AlterRowsRequest>>,
    uploaded_files: parking_lot::Mutex<Vec<String>>,
}

impl MockSynchronizer {
    /// Creates a new mock synchronizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table listing.
    pub fn set_tables(&self, tables: Vec<TableResource>) {
        *self.tables.lock() = tables;
    }

    /// Sets a table's definition.
    pub fn set_table_definition(&self, definition: TableDefinition) {
        self.definitions
            .lock()
            .insert(definition.table_id.clone(), definition);
    }

    /// Sets the manifest served for a scope.
    pub fn set_manifest(&self, scope: &ManifestScope, manifest: FileManifestDocument) {
        self.manifests.lock().insert(scope.cache_key(), manifest);
    }

    /// Queues change-set pages for a table, served in order.
    pub fn set_change_pages(&self, table_id: &str, pages: Vec<ChangeSetPage>) {
        self.change_pages.lock().insert(table_id.to_string(), pages);
    }

    /// Queues an alter-rows response.
    pub fn push_alter_response(&self, response: AlterRowsResponse) {
        self.alter_responses.lock().push(response);
    }

    /// Alter-rows requests seen so far.
    pub fn alter_requests(&self) -> Vec<AlterRowsRequest> {
        self.alter_requests.lock().clone()
    }

    /// Paths of files uploaded so far.
    pub fn uploaded_files(&self) -> Vec<String> {
        self.uploaded_files.lock().clone()
    }
}

impl Synchronizer for MockSynchronizer {
    fn list_tables(&self) -> SyncResult<Vec<TableResource>> {
        Ok(self.tables.lock().clone())
    }

    fn get_table_definition(&self, table_id: &str) -> SyncResult<TableDefinition> {
        self.definitions
            .lock()
            .get(table_id)
            .cloned()
            .ok_or_else(|| SyncError::Protocol(format!("no mock definition for {table_id}")))
    }

    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableResource> {
        let resource = TableResource {
            table_id: definition.table_id.clone(),
            schema_etag: "mock-schema-etag".into(),
            data_etag: None,
        };
        self.tables.lock().push(resource.clone());
        let mut assigned = definition.clone();
        assigned.schema_etag = Some(resource.schema_etag.clone());
        self.definitions
            .lock()
            .insert(definition.table_id.clone(), assigned);
        Ok(resource)
    }

    fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        self.tables.lock().retain(|t| t.table_id != table_id);
        self.definitions.lock().remove(table_id);
        Ok(())
    }

    fn get_manifest(
        &self,
        scope: &ManifestScope,
        cached_etag: Option<&str>,
    ) -> SyncResult<ManifestOutcome> {
        let manifest = self
            .manifests
            .lock()
            .get(&scope.cache_key())
            .cloned()
            .unwrap_or_default();
        if cached_etag.is_some() && cached_etag == manifest.manifest_etag.as_deref() {
            return Ok(ManifestOutcome::NotModified);
        }
        Ok(ManifestOutcome::Changed(manifest))
    }

    fn download_config_file(
        &self,
        _scope: &ManifestScope,
        relative_path: &str,
    ) -> SyncResult<Vec<u8>> {
        Ok(relative_path.as_bytes().to_vec())
    }

    fn upload_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
        _content: &[u8],
    ) -> SyncResult<()> {
        self.uploaded_files
            .lock()
            .push(format!("{}/{relative_path}", scope.cache_key()));
        Ok(())
    }

    fn delete_config_file(&self, _scope: &ManifestScope, _relative_path: &str) -> SyncResult<()> {
        Ok(())
    }

    fn get_changes(
        &self,
        table_id: &str,
        _data_etag: Option<&str>,
        _cursor: Option<&str>,
    ) -> SyncResult<ChangeSetPage> {
        let mut pages = self.change_pages.lock();
        let queue = pages.entry(table_id.to_string()).or_default();
        if queue.is_empty() {
            return Ok(ChangeSetPage::default());
        }
        Ok(queue.remove(0))
    }

    fn alter_rows(
        &self,
        _table_id: &str,
        request: &AlterRowsRequest,
    ) -> SyncResult<AlterRowsResponse> {
        self.alter_requests.lock().push(request.clone());
        let mut responses = self.alter_responses.lock();
        if responses.is_empty() {
            return Err(SyncError::Protocol("no mock alter-rows response set".into()));
        }
        Ok(responses.remove(0))
    }

    fn get_attachment_manifest(
        &self,
        _table_id: &str,
        _row_id: &str,
    ) -> SyncResult<FileManifestDocument> {
        Ok(FileManifestDocument::default())
    }

    fn download_attachments(
        &self,
        _table_id: &str,
        _row_id: &str,
        relative_paths: &[String],
    ) -> SyncResult<Vec<AttachmentFile>> {
        Ok(relative_paths
            .iter()
            .map(|p| AttachmentFile {
                relative_path: p.clone(),
                content: Vec::new(),
            })
            .collect())
    }

    fn upload_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        files: &[AttachmentFile],
    ) -> SyncResult<()> {
        let mut uploaded = self.uploaded_files.lock();
        for file in files {
            uploaded.push(format!("row/{table_id}/{row_id}/{}", file.relative_path));
        }
        Ok(())
    }
}
