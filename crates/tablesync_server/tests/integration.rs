//! End-to-end client/server sync scenarios.
//!
//! Two independent clients (each with its own local store and file
//! storage) sync against one [`InProcessServer`], exercising the full
//! orchestrated pass: schema reconciliation, configuration files, row
//! push/pull with conflicts, and attachments.

use std::time::Duration;
use tablesync_engine::{
    DiskFileStore, FileStore, ManifestScope, MemoryFileStore, RetryConfig, SyncConfig, SyncError,
    SyncOrchestrator, SyncStage,
};
use std::collections::BTreeMap;
use tablesync_protocol::{
    ColumnDefinition, ColumnType, ConflictType, Row, RowChange, Scope, SyncState, TableDefinition,
};
use tablesync_server::InProcessServer;
use tablesync_store::{row_scope, RowInput, RowPresence, TableStore, TransactionKind};

const TS: &str = "2026-03-01T00:00:00Z";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> SyncConfig {
    SyncConfig::new("default", "https://srv.example.com", "user@example.com")
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(1)))
}

fn notes_definition() -> TableDefinition {
    TableDefinition::new(
        "notes",
        vec![ColumnDefinition::new("body", "body", ColumnType::scalar("string"))],
    )
    .unwrap()
}

fn photos_definition() -> TableDefinition {
    TableDefinition::new(
        "photos",
        vec![
            ColumnDefinition::new("caption", "caption", ColumnType::scalar("string")),
            ColumnDefinition::new("image", "image", ColumnType::scalar("rowpath")),
        ],
    )
    .unwrap()
}

fn client(server: &InProcessServer) -> (TableStore, SyncOrchestrator<&InProcessServer, MemoryFileStore>) {
    init_tracing();
    let store = TableStore::new();
    let orchestrator = SyncOrchestrator::new(config(), server, MemoryFileStore::new());
    (store, orchestrator)
}

fn create_table_with_row(store: &TableStore, definition: TableDefinition, row_id: &str, column: &str, value: &str) {
    store
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.create_table(definition)?;
            txn.insert_row(
                "notes",
                RowInput::new(row_id, TS).with_value(column, Some(value.to_string())),
            )
        })
        .unwrap();
}

fn edit(store: &TableStore, table: &str, row_id: &str, column: &str, value: &str) {
    store
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.update_row(
                table,
                RowInput::new(row_id, TS).with_value(column, Some(value.to_string())),
            )
        })
        .unwrap();
}

fn simple_row(store: &TableStore, table: &str, row_id: &str) -> Row {
    match store.row(table, row_id) {
        Some(RowPresence::Simple(row)) => row,
        other => panic!("expected a simple row, got {other:?}"),
    }
}

fn value(row: &Row, column: &str) -> Option<String> {
    row.values.get(column).cloned().flatten()
}

#[test]
fn first_sync_pushes_local_table_and_second_client_pulls_it() {
    let server = InProcessServer::new();
    let (store_a, orch_a) = client(&server);
    create_table_with_row(&store_a, notes_definition(), "r1", "body", "hello");

    let result = orch_a.sync_all(&store_a).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.pushed, 1);

    let row = simple_row(&store_a, "notes", "r1");
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(row.row_etag, server.row_etag("notes", "r1"));

    let (store_b, orch_b) = client(&server);
    let result = orch_b.sync_all(&store_b).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.pulled, 1);

    let row = simple_row(&store_b, "notes", "r1");
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(value(&row, "body").as_deref(), Some("hello"));
    assert_eq!(
        store_a.last_data_etag("notes"),
        store_b.last_data_etag("notes")
    );
}

#[test]
fn concurrent_edits_materialize_a_two_variant_conflict() {
    let server = InProcessServer::new();
    let (store_a, orch_a) = client(&server);
    create_table_with_row(&store_a, notes_definition(), "r1", "body", "base");
    orch_a.sync_all(&store_a).unwrap();

    let (store_b, orch_b) = client(&server);
    orch_b.sync_all(&store_b).unwrap();

    edit(&store_a, "notes", "r1", "body", "from-a");
    orch_a.sync_all(&store_a).unwrap();

    edit(&store_b, "notes", "r1", "body", "from-b");
    let result = orch_b.sync_all(&store_b).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.conflicts, 1);

    match store_b.row("notes", "r1").unwrap() {
        RowPresence::Conflicted { local, server: srv } => {
            assert_eq!(value(&local, "body").as_deref(), Some("from-b"));
            assert_eq!(
                local.conflict_type,
                Some(ConflictType::LocalUpdatedUpdatedValues)
            );
            assert_eq!(value(&srv, "body").as_deref(), Some("from-a"));
            assert_eq!(
                srv.conflict_type,
                Some(ConflictType::ServerUpdatedUpdatedValues)
            );
            assert_eq!(srv.row_etag, server.row_etag("notes", "r1"));
        }
        other => panic!("expected a conflicted row, got {other:?}"),
    }
}

#[test]
fn stale_edit_over_a_foreign_update_yields_paired_variants() {
    let server = InProcessServer::new();
    let (store, orchestrator) = client(&server);
    store
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.create_table(
                TableDefinition::new(
                    "readings",
                    vec![ColumnDefinition::new(
                        "testColumn",
                        "testColumn",
                        ColumnType::scalar("integer"),
                    )],
                )
                .unwrap(),
            )?;
            txn.insert_row(
                "readings",
                RowInput::new("r1", TS).with_value("testColumn", Some("5".into())),
            )
        })
        .unwrap();
    orchestrator.sync_all(&store).unwrap();
    let pushed_etag = simple_row(&store, "readings", "r1").row_etag;
    assert_eq!(pushed_etag, server.row_etag("readings", "r1"));

    // Another client's accepted update lands on the server.
    server
        .seed_row(
            "readings",
            &RowChange {
                row_id: "r1".into(),
                row_etag: pushed_etag,
                deleted: false,
                values: BTreeMap::from([("testColumn".to_string(), Some("6".to_string()))]),
                savepoint_type: Some("complete".into()),
                savepoint_timestamp: TS.into(),
                savepoint_creator: Some("other@example.com".into()),
                scope: Scope::default(),
                form_id: None,
                locale: None,
            },
        )
        .unwrap();

    // The stale local edit loses; both variants are materialized.
    edit(&store, "readings", "r1", "testColumn", "7");
    let result = orchestrator.sync_all(&store).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.conflicts, 1);
    match store.row("readings", "r1").unwrap() {
        RowPresence::Conflicted { local, server: srv } => {
            assert_eq!(value(&local, "testColumn").as_deref(), Some("7"));
            assert_eq!(
                local.conflict_type,
                Some(ConflictType::LocalUpdatedUpdatedValues)
            );
            assert_eq!(value(&srv, "testColumn").as_deref(), Some("6"));
            assert_eq!(
                srv.conflict_type,
                Some(ConflictType::ServerUpdatedUpdatedValues)
            );
        }
        other => panic!("expected a conflicted row, got {other:?}"),
    }
}

#[test]
fn take_server_resolution_settles_both_clients() {
    let server = InProcessServer::new();
    let (store_a, orch_a) = client(&server);
    create_table_with_row(&store_a, notes_definition(), "r1", "body", "base");
    orch_a.sync_all(&store_a).unwrap();
    let (store_b, orch_b) = client(&server);
    orch_b.sync_all(&store_b).unwrap();
    edit(&store_a, "notes", "r1", "body", "from-a");
    orch_a.sync_all(&store_a).unwrap();
    edit(&store_b, "notes", "r1", "body", "from-b");
    orch_b.sync_all(&store_b).unwrap();

    store_b
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.resolve_conflict_take_server("notes", "r1")
        })
        .unwrap();

    let row = simple_row(&store_b, "notes", "r1");
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(value(&row, "body").as_deref(), Some("from-a"));

    // Nothing left to exchange on either side.
    let result = orch_b.sync_all(&store_b).unwrap();
    assert_eq!(result.tables[0].rows.pushed, 0);
    assert_eq!(result.tables[0].rows.pulled, 0);
}

#[test]
fn take_local_resolution_pushes_the_local_variant() {
    let server = InProcessServer::new();
    let (store_a, orch_a) = client(&server);
    create_table_with_row(&store_a, notes_definition(), "r1", "body", "base");
    orch_a.sync_all(&store_a).unwrap();
    let (store_b, orch_b) = client(&server);
    orch_b.sync_all(&store_b).unwrap();
    edit(&store_a, "notes", "r1", "body", "from-a");
    orch_a.sync_all(&store_a).unwrap();
    edit(&store_b, "notes", "r1", "body", "from-b");
    orch_b.sync_all(&store_b).unwrap();

    store_b
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.resolve_conflict_take_local("notes", "r1")
        })
        .unwrap();
    // The kept local variant carries the server's current ETag, so the
    // follow-up push wins the optimistic check.
    let result = orch_b.sync_all(&store_b).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.pushed, 1);
    assert_eq!(simple_row(&store_b, "notes", "r1").sync_state, SyncState::Synced);

    let result = orch_a.sync_all(&store_a).unwrap();
    assert_eq!(result.tables[0].rows.pulled, 1);
    assert_eq!(
        value(&simple_row(&store_a, "notes", "r1"), "body").as_deref(),
        Some("from-b")
    );
}

#[test]
fn deletes_propagate_between_clients() {
    let server = InProcessServer::new();
    let (store_a, orch_a) = client(&server);
    create_table_with_row(&store_a, notes_definition(), "r1", "body", "bye");
    orch_a.sync_all(&store_a).unwrap();
    let (store_b, orch_b) = client(&server);
    orch_b.sync_all(&store_b).unwrap();

    store_a
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.delete_row("notes", "r1")
        })
        .unwrap();
    orch_a.sync_all(&store_a).unwrap();
    assert!(store_a.row("notes", "r1").is_none());
    assert_eq!(server.row_etag("notes", "r1"), None);

    orch_b.sync_all(&store_b).unwrap();
    assert!(store_b.row("notes", "r1").is_none());
}

#[test]
fn attachments_round_trip_between_clients() {
    let server = InProcessServer::new();

    let dir_a = tempfile::tempdir().unwrap();
    let store_a = TableStore::new();
    let orch_a = SyncOrchestrator::new(config(), &server, DiskFileStore::new(dir_a.path()));
    store_a
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.create_table(photos_definition())?;
            txn.insert_row(
                "photos",
                RowInput::new("r1", TS)
                    .with_value("caption", Some("sunset".into()))
                    .with_value("image", Some("img.jpg".into())),
            )
        })
        .unwrap();
    DiskFileStore::new(dir_a.path())
        .write(&row_scope("photos", "r1"), "img.jpg", b"jpeg-bytes")
        .unwrap();

    let result = orch_a.sync_all(&store_a).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].attachments.uploaded, 1);
    assert_eq!(result.tables[0].attachments.rows_completed, 1);
    assert_eq!(
        server.attachment("photos", "r1", "img.jpg").as_deref(),
        Some(b"jpeg-bytes".as_slice())
    );
    assert_eq!(simple_row(&store_a, "photos", "r1").sync_state, SyncState::Synced);

    let dir_b = tempfile::tempdir().unwrap();
    let store_b = TableStore::new();
    let orch_b = SyncOrchestrator::new(config(), &server, DiskFileStore::new(dir_b.path()));
    let result = orch_b.sync_all(&store_b).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].attachments.downloaded, 1);

    let row = simple_row(&store_b, "photos", "r1");
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(
        DiskFileStore::new(dir_b.path())
            .read(&row_scope("photos", "r1"), "img.jpg")
            .unwrap()
            .as_deref(),
        Some(b"jpeg-bytes".as_slice())
    );
}

#[test]
fn paged_change_feed_is_fully_consumed() {
    let server = InProcessServer::new();
    let (store_a, orch_a) = client(&server);
    store_a
        .transaction(TransactionKind::Exclusive, |txn| {
            txn.create_table(notes_definition())?;
            for i in 0..5 {
                txn.insert_row(
                    "notes",
                    RowInput::new(format!("r{i}"), TS)
                        .with_value("body", Some(format!("note {i}"))),
                )?;
            }
            Ok(())
        })
        .unwrap();
    orch_a.sync_all(&store_a).unwrap();

    server.set_page_size(2);
    let (store_b, orch_b) = client(&server);
    let result = orch_b.sync_all(&store_b).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.pulled, 5);
    for i in 0..5 {
        assert_eq!(
            simple_row(&store_b, "notes", &format!("r{i}")).sync_state,
            SyncState::Synced
        );
    }
    assert_eq!(
        store_b.last_data_etag("notes"),
        store_a.last_data_etag("notes")
    );
}

#[test]
fn app_config_files_download_once() {
    let server = InProcessServer::new();
    server.put_config_file(&ManifestScope::App, "config/app.properties", b"a=1");

    let dir = tempfile::tempdir().unwrap();
    let store = TableStore::new();
    let orchestrator = SyncOrchestrator::new(config(), &server, DiskFileStore::new(dir.path()));

    let result = orchestrator.sync_all(&store).unwrap();
    assert_eq!(result.app_files, 1);
    assert_eq!(
        DiskFileStore::new(dir.path())
            .read("app", "config/app.properties")
            .unwrap()
            .as_deref(),
        Some(b"a=1".as_slice())
    );

    // The cached manifest ETag short-circuits the second pass.
    let result = orchestrator.sync_all(&store).unwrap();
    assert_eq!(result.app_files, 0);
}

#[test]
fn rejected_push_leaves_the_edit_pending() {
    let server = InProcessServer::new();
    let (store, orchestrator) = client(&server);
    create_table_with_row(&store, notes_definition(), "r1", "body", "base");
    orchestrator.sync_all(&store).unwrap();

    edit(&store, "notes", "r1", "body", "retry me");
    server.set_reject_all_rows(true);
    let result = orchestrator.sync_all(&store).unwrap();
    assert!(result.fully_successful());
    assert_eq!(result.tables[0].rows.conflicts, 1);
    assert_eq!(simple_row(&store, "notes", "r1").sync_state, SyncState::Changed);

    // Once the server accepts again, the retained edit goes through.
    server.set_reject_all_rows(false);
    let result = orchestrator.sync_all(&store).unwrap();
    assert_eq!(result.tables[0].rows.pushed, 1);
    assert_eq!(simple_row(&store, "notes", "r1").sync_state, SyncState::Synced);
}

#[test]
fn auth_failure_aborts_the_run() {
    let server = InProcessServer::new();
    let (store, orchestrator) = client(&server);
    server.set_fail_auth(true);

    let err = orchestrator.sync_all(&store).unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    assert_eq!(orchestrator.progress().stage, SyncStage::Aborted);
}

#[test]
fn transient_failures_are_retried_within_one_run() {
    let server = InProcessServer::new();
    let (store, orchestrator) = client(&server);
    create_table_with_row(&store, notes_definition(), "r1", "body", "hello");

    // Two injected failures; the third attempt of the table listing wins.
    server.fail_next_requests(2);
    let result = orchestrator.sync_all(&store).unwrap();
    assert!(result.fully_successful());
    assert!(server.row_etag("notes", "r1").is_some());
}

#[test]
fn transient_failure_without_retries_fails_the_run() {
    init_tracing();
    let server = InProcessServer::new();
    let store = TableStore::new();
    let orchestrator = SyncOrchestrator::new(
        config().with_retry(RetryConfig::no_retry()),
        &server,
        MemoryFileStore::new(),
    );

    server.fail_next_requests(1);
    let err = orchestrator.sync_all(&store).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(orchestrator.progress().stage, SyncStage::Aborted);

    let result = orchestrator.sync_all(&store).unwrap();
    assert!(result.fully_successful());
}
