//! Schema reconciliation between the local store and the server.
//!
//! Reconciliation never migrates data: a structural difference between
//! the two sides is surfaced as an error for the caller to resolve.

use crate::error::{SyncError, SyncResult};
use crate::transport::Synchronizer;
use tablesync_protocol::TableResource;
use tablesync_store::{TableStore, TransactionKind};
use tracing::{info, warn};

/// What reconciliation did for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAction {
    /// Schema epochs already matched.
    UpToDate,
    /// The table existed only on the server; it was created locally.
    CreatedLocally,
    /// The table existed only locally and had never synced; it was
    /// created on the server.
    CreatedOnServer,
    /// The server re-declared a structurally identical schema under a new
    /// epoch; the local table adopted it.
    AdoptedEtag,
    /// The server no longer has this previously synced table; it was
    /// dropped locally.
    DroppedLocally,
}

/// Reconciles one table's schema with the server.
///
/// `resource` is the server's listing entry for the table, `None` when
/// the server does not list it.
pub fn reconcile_table(
    store: &TableStore,
    sync: &dyn Synchronizer,
    table_id: &str,
    resource: Option<&TableResource>,
) -> SyncResult<SchemaAction> {
    let local = if store.has_table(table_id) {
        Some(store.table_definition(table_id)?)
    } else {
        None
    };

    match (local, resource) {
        (None, Some(resource)) => {
            let mut definition = sync.get_table_definition(table_id)?;
            definition.schema_etag = Some(resource.schema_etag.clone());
            store.transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(definition)
            })?;
            info!(table_id, "created table from server schema");
            Ok(SchemaAction::CreatedLocally)
        }
        (Some(local), None) => {
            if local.schema_etag.is_none() {
                let resource = sync.create_table(&local)?;
                store.transaction(TransactionKind::Exclusive, |txn| {
                    txn.set_schema_etag(table_id, Some(resource.schema_etag.clone()))
                })?;
                info!(table_id, "created table on server");
                Ok(SchemaAction::CreatedOnServer)
            } else {
                // Previously synced and now gone server-side: the deletion
                // propagates.
                store.transaction(TransactionKind::Exclusive, |txn| txn.drop_table(table_id))?;
                warn!(table_id, "server dropped table, removing local copy");
                Ok(SchemaAction::DroppedLocally)
            }
        }
        (Some(local), Some(resource)) => {
            if local.schema_etag.as_deref() == Some(resource.schema_etag.as_str()) {
                return Ok(SchemaAction::UpToDate);
            }
            let server_definition = sync.get_table_definition(table_id)?;
            if !local.structurally_equal(&server_definition) {
                return Err(SyncError::SchemaMismatch {
                    table_id: table_id.to_string(),
                    message: "server column structure differs from local".into(),
                });
            }
            // Same structure, new epoch: adopt it. Attachments live under
            // a schema-qualified server path, so cached hashes are stale,
            // and the data epoch restarts with the schema epoch.
            store.transaction(TransactionKind::Exclusive, |txn| {
                txn.set_schema_etag(table_id, Some(resource.schema_etag.clone()))?;
                txn.set_last_data_etag(table_id, None)?;
                txn.invalidate_attachment_etags(table_id);
                Ok(())
            })?;
            info!(table_id, schema_etag = %resource.schema_etag, "adopted re-declared schema epoch");
            Ok(SchemaAction::AdoptedEtag)
        }
        (None, None) => Err(SyncError::Protocol(format!(
            "table {table_id} exists on neither side"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockSynchronizer;
    use tablesync_protocol::{ColumnDefinition, ColumnType, TableDefinition};

    fn definition(table_id: &str, col_type: &str) -> TableDefinition {
        TableDefinition::new(
            table_id,
            vec![ColumnDefinition::new("c", "c", ColumnType::scalar(col_type))],
        )
        .unwrap()
    }

    fn resource(table_id: &str, schema_etag: &str) -> TableResource {
        TableResource {
            table_id: table_id.into(),
            schema_etag: schema_etag.into(),
            data_etag: None,
        }
    }

    #[test]
    fn server_only_table_is_created_locally() {
        let store = TableStore::new();
        let mock = MockSynchronizer::new();
        mock.set_table_definition(definition("t", "string"));

        let action = reconcile_table(&store, &mock, "t", Some(&resource("t", "s1"))).unwrap();
        assert_eq!(action, SchemaAction::CreatedLocally);
        assert_eq!(
            store.table_definition("t").unwrap().schema_etag.as_deref(),
            Some("s1")
        );
    }

    #[test]
    fn never_synced_local_table_is_created_on_server() {
        let store = TableStore::new();
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(definition("t", "string"))
            })
            .unwrap();
        let mock = MockSynchronizer::new();

        let action = reconcile_table(&store, &mock, "t", None).unwrap();
        assert_eq!(action, SchemaAction::CreatedOnServer);
        assert!(store.table_definition("t").unwrap().schema_etag.is_some());
        assert_eq!(mock.list_tables().unwrap().len(), 1);
    }

    #[test]
    fn previously_synced_table_gone_on_server_is_dropped() {
        let store = TableStore::new();
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(definition("t", "string"))?;
                txn.set_schema_etag("t", Some("s1".into()))
            })
            .unwrap();
        let mock = MockSynchronizer::new();

        let action = reconcile_table(&store, &mock, "t", None).unwrap();
        assert_eq!(action, SchemaAction::DroppedLocally);
        assert!(!store.has_table("t"));
    }

    #[test]
    fn matching_etags_do_nothing() {
        let store = TableStore::new();
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(definition("t", "string"))?;
                txn.set_schema_etag("t", Some("s1".into()))
            })
            .unwrap();
        let mock = MockSynchronizer::new();

        let action = reconcile_table(&store, &mock, "t", Some(&resource("t", "s1"))).unwrap();
        assert_eq!(action, SchemaAction::UpToDate);
    }

    #[test]
    fn identical_structure_under_new_etag_is_adopted() {
        let store = TableStore::new();
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(definition("t", "string"))?;
                txn.set_schema_etag("t", Some("s1".into()))?;
                txn.set_last_data_etag("t", Some("d9".into()))?;
                txn.put_file_etag(&tablesync_store::row_scope("t", "r1"), "photo.jpg", "sha256:a");
                Ok(())
            })
            .unwrap();
        let mock = MockSynchronizer::new();
        mock.set_table_definition(definition("t", "string"));

        let action = reconcile_table(&store, &mock, "t", Some(&resource("t", "s2"))).unwrap();
        assert_eq!(action, SchemaAction::AdoptedEtag);
        assert_eq!(
            store.table_definition("t").unwrap().schema_etag.as_deref(),
            Some("s2")
        );
        // The data epoch restarts and cached attachment hashes are gone.
        assert_eq!(store.last_data_etag("t"), None);
        assert_eq!(
            store.file_etag(&tablesync_store::row_scope("t", "r1"), "photo.jpg"),
            None
        );
    }

    #[test]
    fn structural_difference_is_an_error_not_a_migration() {
        let store = TableStore::new();
        store
            .transaction(TransactionKind::Exclusive, |txn| {
                txn.create_table(definition("t", "string"))?;
                txn.set_schema_etag("t", Some("s1".into()))
            })
            .unwrap();
        let mock = MockSynchronizer::new();
        mock.set_table_definition(definition("t", "integer"));

        let err = reconcile_table(&store, &mock, "t", Some(&resource("t", "s2"))).unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
        // Local schema is untouched.
        assert_eq!(
            store.table_definition("t").unwrap().schema_etag.as_deref(),
            Some("s1")
        );
    }
}
