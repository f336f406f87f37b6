//! Full-pass sync orchestration.
//!
//! A run walks fixed stages: app-level configuration files, then per
//! table schema reconciliation, table-level configuration files, row
//! data, and row attachments. Tables are isolated: one table's failure
//! is recorded in its outcome and the run continues, except for
//! cancellation and authentication failures, which abort the run.

use crate::attachments::{sync_table_attachments, AttachmentOutcome};
use crate::config::SyncConfig;
use crate::differ::{diff_manifest_pull, diff_manifest_push};
use crate::error::{SyncError, SyncResult};
use crate::files::FileStore;
use crate::rows::{sync_table_rows, TableSyncOutcome};
use crate::schema::{reconcile_table, SchemaAction};
use crate::transport::{ManifestOutcome, ManifestScope, Synchronizer};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tablesync_store::{TableStore, TransactionKind};
use tracing::{error, info, warn};

/// Stage of an orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// Not yet started.
    Idle,
    /// Listing server tables and validating compatibility.
    Init,
    /// Transferring app-level configuration files.
    AppFiles,
    /// Working through per-table stages.
    Tables,
    /// Run finished successfully (possibly with per-table errors).
    Complete,
    /// Run aborted.
    Aborted,
}

/// Progress snapshot, cheap to clone for display.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Current stage.
    pub stage: SyncStage,
    /// Table being processed, when in the table stages.
    pub current_table: Option<String>,
    /// Tables finished so far.
    pub tables_completed: usize,
    /// Total tables in this run.
    pub table_count: usize,
}

impl SyncProgress {
    fn idle() -> Self {
        Self {
            stage: SyncStage::Idle,
            current_table: None,
            tables_completed: 0,
            table_count: 0,
        }
    }

    /// Overall completion estimate in percent: completed major steps over
    /// total steps, where the app-file pass is one step and each table is
    /// one step.
    pub fn percent(&self) -> u8 {
        match self.stage {
            SyncStage::Idle | SyncStage::Init | SyncStage::AppFiles => 0,
            SyncStage::Tables => {
                let total = 1 + self.table_count;
                (100 * (1 + self.tables_completed) / total) as u8
            }
            SyncStage::Complete => 100,
            SyncStage::Aborted => 0,
        }
    }
}

/// Outcome for one table in a run.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    /// Table identifier.
    pub table_id: String,
    /// What schema reconciliation did.
    pub schema: Option<SchemaAction>,
    /// Table-level configuration files transferred.
    pub config_files: usize,
    /// Row-data counters.
    pub rows: TableSyncOutcome,
    /// Attachment counters.
    pub attachments: AttachmentOutcome,
    /// Error that stopped this table, if any.
    pub error: Option<String>,
}

impl TableOutcome {
    fn new(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            schema: None,
            config_files: 0,
            rows: TableSyncOutcome::default(),
            attachments: AttachmentOutcome::default(),
            error: None,
        }
    }
}

/// Result of one orchestrated run.
#[derive(Debug, Clone)]
pub struct SyncRunResult {
    /// App-level configuration files transferred.
    pub app_files: usize,
    /// Per-table outcomes, in processing order.
    pub tables: Vec<TableOutcome>,
}

impl SyncRunResult {
    /// True when every table finished without error.
    pub fn fully_successful(&self) -> bool {
        self.tables.iter().all(|t| t.error.is_none())
    }
}

/// Drives full sync passes against one server.
pub struct SyncOrchestrator<S: Synchronizer, F: FileStore> {
    config: SyncConfig,
    sync: S,
    files: F,
    progress: RwLock<SyncProgress>,
    cancelled: AtomicBool,
}

impl<S: Synchronizer, F: FileStore> SyncOrchestrator<S, F> {
    /// Creates an orchestrator.
    pub fn new(config: SyncConfig, sync: S, files: F) -> Self {
        Self {
            config,
            sync,
            files,
            progress: RwLock::new(SyncProgress::idle()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> SyncProgress {
        self.progress.read().clone()
    }

    /// Requests cancellation of an in-flight run. The run stops at the
    /// next stage boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_progress(&self, f: impl FnOnce(&mut SyncProgress)) {
        f(&mut self.progress.write());
    }

    /// Runs one full sync pass.
    pub fn sync_all(&self, store: &TableStore) -> SyncResult<SyncRunResult> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.set_progress(|p| *p = SyncProgress::idle());
        match self.run(store) {
            Ok(result) => {
                self.set_progress(|p| p.stage = SyncStage::Complete);
                Ok(result)
            }
            Err(e) => {
                self.set_progress(|p| p.stage = SyncStage::Aborted);
                Err(e)
            }
        }
    }

    fn run(&self, store: &TableStore) -> SyncResult<SyncRunResult> {
        self.set_progress(|p| p.stage = SyncStage::Init);
        let resources = self.config.retry.run(|| self.sync.list_tables())?;

        self.check_cancelled()?;
        self.set_progress(|p| p.stage = SyncStage::AppFiles);
        let app_files = self.pull_config_files(store, &ManifestScope::App)?;

        // Union of both sides, so local-only tables are pushed or dropped
        // and server-only tables are created.
        let mut table_ids: BTreeSet<String> =
            store.list_table_ids().into_iter().collect();
        table_ids.extend(resources.iter().map(|r| r.table_id.clone()));

        self.set_progress(|p| {
            p.stage = SyncStage::Tables;
            p.table_count = table_ids.len();
        });

        let mut result = SyncRunResult {
            app_files,
            tables: Vec::with_capacity(table_ids.len()),
        };

        for table_id in table_ids {
            self.check_cancelled()?;
            self.set_progress(|p| p.current_table = Some(table_id.clone()));

            let resource = resources.iter().find(|r| r.table_id == table_id);
            let mut outcome = TableOutcome::new(&table_id);
            match self.sync_one_table(store, &table_id, resource, &mut outcome) {
                Ok(()) => {}
                // These abort the whole run; everything else stays local
                // to the table.
                Err(e @ (SyncError::Cancelled | SyncError::AuthenticationFailed(_))) => {
                    return Err(e)
                }
                Err(e) => {
                    error!(table_id, error = %e, "table sync failed");
                    outcome.error = Some(e.to_string());
                }
            }
            result.tables.push(outcome);
            self.set_progress(|p| {
                p.tables_completed += 1;
                p.current_table = None;
            });
        }

        info!(
            tables = result.tables.len(),
            app_files = result.app_files,
            success = result.fully_successful(),
            "sync pass complete"
        );
        Ok(result)
    }

    fn sync_one_table(
        &self,
        store: &TableStore,
        table_id: &str,
        resource: Option<&tablesync_protocol::TableResource>,
        outcome: &mut TableOutcome,
    ) -> SyncResult<()> {
        let action = reconcile_table(store, &self.sync, table_id, resource)?;
        outcome.schema = Some(action);
        if action == SchemaAction::DroppedLocally {
            return Ok(());
        }

        let scope = ManifestScope::Table(table_id.to_string());
        outcome.config_files = if action == SchemaAction::CreatedOnServer {
            self.push_config_files(&scope)?
        } else {
            self.pull_config_files(store, &scope)?
        };

        outcome.rows = sync_table_rows(store, &self.sync, &self.config, table_id)?;
        outcome.attachments =
            sync_table_attachments(store, &self.files, &self.sync, &self.config, table_id)?;

        store.transaction(TransactionKind::Exclusive, |txn| {
            txn.set_last_sync_time(table_id, unix_timestamp())
        })?;
        Ok(())
    }

    /// Pulls a scope's configuration files: the server listing is
    /// authoritative, so stale and local-only files are replaced or
    /// removed. Returns files transferred or deleted.
    fn pull_config_files(&self, store: &TableStore, scope: &ManifestScope) -> SyncResult<usize> {
        let cache_key = scope.cache_key();
        let cached = store.manifest_etag(&cache_key);
        let manifest = match self
            .config
            .retry
            .run(|| self.sync.get_manifest(scope, cached.as_deref()))?
        {
            ManifestOutcome::NotModified => return Ok(0),
            ManifestOutcome::Changed(manifest) => manifest,
        };

        let local = self.files.list(&cache_key)?;
        let diff = diff_manifest_pull(&manifest.entries, &local);

        let mut transferred = 0;
        for entry in &diff.to_download {
            // A local copy that diverged while the server hash stayed at
            // its last recorded value was changed deliberately; leave it.
            let cached = store.file_etag(&cache_key, &entry.relative_path);
            if cached.as_deref() == Some(entry.content_hash.as_str())
                && local.iter().any(|l| l.relative_path == entry.relative_path)
            {
                continue;
            }
            let content = self
                .config
                .retry
                .run(|| self.sync.download_config_file(scope, &entry.relative_path))?;
            self.files.write(&cache_key, &entry.relative_path, &content)?;
            transferred += 1;
        }
        for entry in &diff.to_delete_local {
            self.files.delete(&cache_key, &entry.relative_path)?;
        }
        transferred += diff.to_delete_local.len();

        store.transaction(TransactionKind::Exclusive, |txn| {
            for entry in &manifest.entries {
                if !entry.is_placeholder() {
                    txn.put_file_etag(&cache_key, &entry.relative_path, &entry.content_hash);
                }
            }
            for entry in &diff.to_delete_local {
                txn.remove_file_etag(&cache_key, &entry.relative_path);
            }
            if let Some(etag) = &manifest.manifest_etag {
                txn.put_manifest_etag(&cache_key, etag);
            }
            Ok(())
        })?;
        Ok(transferred)
    }

    /// Pushes a scope's local configuration files: the local listing is
    /// authoritative, so stale server copies are replaced and server-only
    /// files removed. Used for freshly created tables.
    fn push_config_files(&self, scope: &ManifestScope) -> SyncResult<usize> {
        let cache_key = scope.cache_key();
        let manifest = match self.sync.get_manifest(scope, None)? {
            ManifestOutcome::NotModified => {
                warn!(scope = %cache_key, "server answered not-modified to an unconditional manifest fetch");
                return Ok(0);
            }
            ManifestOutcome::Changed(manifest) => manifest,
        };
        let local = self.files.list(&cache_key)?;
        let diff = diff_manifest_push(&manifest.entries, &local);

        for entry in &diff.to_upload {
            let content = self
                .files
                .read(&cache_key, &entry.relative_path)?
                .ok_or_else(|| {
                    SyncError::FileStorage(format!(
                        "config file disappeared during sync: {}",
                        entry.relative_path
                    ))
                })?;
            self.sync
                .upload_config_file(scope, &entry.relative_path, &content)?;
        }
        for entry in &diff.to_delete_server {
            self.sync.delete_config_file(scope, &entry.relative_path)?;
        }
        Ok(diff.to_upload.len() + diff.to_delete_server.len())
    }
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}
