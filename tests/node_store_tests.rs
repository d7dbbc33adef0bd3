//! The store facade end to end.

mod common;

use std::thread::sleep;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use versioned_node_store::config::{BackendKind, StoreConfig};
use versioned_node_store::schema::{FieldDefinition, SchemaVersion};
use versioned_node_store::validity::ValidityWindow;
use versioned_node_store::{
    FieldType, FieldValue, NodeId, NodeStore, NodeStoreError, NodeType, payload,
};

fn widget_store() -> (NodeStore, tempfile::TempDir) {
    let (store, dir) = common::file_node_store();
    common::register_widget_chain(store.catalog());
    (store, dir)
}

mod crud {
    use super::*;

    #[test]
    fn update_merges_over_the_current_version() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        let id = NodeId::from("1");
        store
            .create(&widget, &id, payload! { "name" => "Widget", "colour" => "red" })
            .unwrap();

        let updated = store
            .update(&widget, &id, payload! { "colour" => "blue", "_schema_version" => 1 })
            .unwrap();
        assert_eq!(updated["name"], FieldValue::from("Widget"));
        assert_eq!(updated["colour"], FieldValue::from("blue"));
        assert_eq!(updated["status"], FieldValue::from("PENDING"));
        // the read before the update migrated the record; the tag in the changes is ignored
        assert_eq!(updated["_schema_version"], FieldValue::Integer(2));

        let history = store.history(&widget, &id).unwrap();
        let versions: Vec<u32> = history.iter().map(|s| s.schema_version).collect();
        assert_eq!(versions, [1, 2, 2]);
    }

    #[test]
    fn invalid_update_writes_nothing() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        let id = NodeId::from("1");
        store
            .create(&widget, &id, payload! { "name" => "Widget", "_schema_version" => 2 })
            .unwrap();

        let err = store
            .update(&widget, &id, payload! { "name" => FieldValue::Null })
            .unwrap_err();
        assert_matches!(err, NodeStoreError::ValidationFailed { .. });
        assert_eq!(err.violations()[0].field, "name");
        assert_eq!(store.history(&widget, &id).unwrap().len(), 1);
    }

    #[test]
    fn update_of_missing_node_is_not_found() {
        let (store, _dir) = widget_store();
        let err = store
            .update(&common::widget(), &NodeId::from("404"), payload! { "name" => "x" })
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.read(&common::widget(), &NodeId::from("404")).unwrap().is_none());
    }

    #[test]
    fn queries_see_upgraded_payloads() {
        let (store, _dir) = common::file_node_store();
        let widget = common::widget();
        for (n, colour) in [(1u64, "red"), (2, "blue"), (3, "red")] {
            store
                .create(&widget, &NodeId::from(n), payload! { "name" => format!("w{n}"), "colour" => colour, "qty" => n as i64 })
                .unwrap();
        }
        common::register_widget_chain(store.catalog());

        let mut red: Vec<_> = store
            .query_by_fields(&widget, &payload! { "colour" => "red", "status" => "PENDING" })
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        red.sort();
        assert_eq!(red, vec![NodeId::from("1"), NodeId::from("3")]);

        // "2" matches the integer 2 by its text form
        let by_qty = store
            .query_by_fields(&widget, &payload! { "qty" => "2" })
            .unwrap();
        assert_eq!(by_qty.len(), 1);
        assert_eq!(by_qty[0].1["colour"], FieldValue::from("blue"));

        let big = store
            .query(&widget, |p| p.get("qty").and_then(FieldValue::as_i64).is_some_and(|q| q >= 2))
            .unwrap();
        assert_eq!(big.len(), 2);

        assert_eq!(store.list_node_types().unwrap(), vec![widget.clone()]);
        assert_eq!(store.list_ids(&widget).unwrap().len(), 3);
    }

    #[test]
    fn declared_fields_match_by_value_not_text() {
        let (store, _dir) = common::file_node_store();
        let gauge = NodeType::new("masterdata/gauge").unwrap();
        store.catalog().register_version(
            &gauge,
            SchemaVersion::new(
                1,
                "",
                [
                    FieldDefinition::builder().name("active").field_type(FieldType::Boolean).build(),
                    FieldDefinition::builder().name("qty").field_type(FieldType::Integer).build(),
                ],
            )
            .unwrap(),
        );
        store
            .create(&gauge, &NodeId::from("1"), payload! { "active" => true, "qty" => 2, "note" => 5 })
            .unwrap();

        let count = |criteria| store.query_by_fields(&gauge, &criteria).unwrap().len();
        assert_eq!(count(payload! { "active" => true, "qty" => 2 }), 1);
        assert_eq!(count(payload! { "active" => "true" }), 0);
        assert_eq!(count(payload! { "qty" => "2" }), 0);
        // undeclared fields still compare by their text form
        assert_eq!(count(payload! { "note" => "5" }), 1);
    }

    #[test]
    fn owner_is_stamped_from_config() {
        common::init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .use_fsync(false)
            .owner_id(Some("importer".into()))
            .build();
        let store = NodeStore::open(config).unwrap();
        let widget = common::widget();
        store.create(&widget, &NodeId::from("1"), payload! { "name" => "Widget" }).unwrap();

        let snapshot = store.read_snapshot(&widget, &NodeId::from("1")).unwrap().unwrap();
        assert_eq!(snapshot.owner_id.as_deref(), Some("importer"));
    }
}

mod logical_versions {
    use super::*;

    #[test]
    fn create_node_allocates_and_opens() {
        let (store, _dir) = widget_store();
        let widget = common::widget();

        let (first, payload) = store.create_node(&widget, payload! { "name" => "bolt" }).unwrap();
        let (second, _) = store.create_node(&widget, payload! { "name" => "nut" }).unwrap();
        assert_eq!(first, NodeId::from("1"));
        assert_eq!(second, NodeId::from("2"));

        assert_eq!(payload["id"], FieldValue::from("1"));
        assert_eq!(payload["_schema_version"], FieldValue::Integer(2));
        assert!(ValidityWindow::of(&payload).is_open());
        assert!(ValidityWindow::of(&payload).contains(Utc::now()));
        assert_eq!(store.next_id(&widget).unwrap(), 3);
    }

    #[test]
    fn revise_keeps_the_old_version_readable() {
        let (store, _dir) = widget_store();
        let widget = common::widget();

        let before_creation = Utc::now();
        sleep(Duration::from_millis(5));
        let (id, _) = store.create_node(&widget, payload! { "name" => "bolt" }).unwrap();
        sleep(Duration::from_millis(5));
        let between = Utc::now();
        sleep(Duration::from_millis(5));
        let revised = store
            .revise(&widget, &id, payload! { "name" => "hex bolt" })
            .unwrap();
        assert_eq!(revised["name"], FieldValue::from("hex bolt"));
        assert_eq!(revised["id"], FieldValue::from(id.to_string()));

        let history = store.history(&widget, &id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(!ValidityWindow::of(&history[1].payload).is_open());
        assert!(ValidityWindow::of(&history[2].payload).is_open());

        let current = store.read(&widget, &id).unwrap().unwrap();
        assert_eq!(current["name"], FieldValue::from("hex bolt"));
        let then = store.read_as_of(&widget, &id, between).unwrap().unwrap();
        assert_eq!(then["name"], FieldValue::from("bolt"));
        assert_eq!(
            store.read_as_of(&widget, &id, Utc::now()).unwrap().unwrap()["name"],
            FieldValue::from("hex bolt")
        );
        assert!(store.read_as_of(&widget, &id, before_creation).unwrap().is_none());
    }

    #[test]
    fn as_of_reads_migrate_old_snapshots_in_memory() {
        let (store, _dir) = common::file_node_store();
        let widget = common::widget();
        let (id, _) = store.create_node(&widget, payload! { "name" => "bolt" }).unwrap();
        common::register_widget_chain(store.catalog());

        let then = store.read_as_of(&widget, &id, Utc::now()).unwrap().unwrap();
        assert_eq!(then["status"], FieldValue::from("PENDING"));
        assert_eq!(store.history(&widget, &id).unwrap().len(), 1);
    }

    #[test]
    fn retired_nodes_leave_active_queries() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        let (keep, _) = store.create_node(&widget, payload! { "name" => "bolt" }).unwrap();
        let (retire, _) = store.create_node(&widget, payload! { "name" => "nut" }).unwrap();

        let retired = store.retire(&widget, &retire).unwrap();
        assert!(!ValidityWindow::of(&retired).is_open());

        let active: Vec<_> = store
            .query_active(&widget)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(active, vec![keep]);

        // still stored, just no longer current
        assert!(store.read(&widget, &retire).unwrap().is_some());
        assert_eq!(store.history(&widget, &retire).unwrap().len(), 2);
        assert_matches!(
            store.retire(&widget, &retire),
            Err(NodeStoreError::NodeNotFound { .. })
        );
        assert_matches!(
            store.revise(&widget, &retire, payload! { "name" => "washer" }),
            Err(NodeStoreError::NodeNotFound { .. })
        );
    }

    #[test]
    fn retired_node_is_not_valid_afterwards() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        let (id, _) = store.create_node(&widget, payload! { "name" => "bolt" }).unwrap();
        sleep(Duration::from_millis(5));
        let while_open = Utc::now();
        sleep(Duration::from_millis(5));
        store.retire(&widget, &id).unwrap();
        sleep(Duration::from_millis(5));

        assert!(store.read_as_of(&widget, &id, Utc::now()).unwrap().is_none());
        let then = store.read_as_of(&widget, &id, while_open).unwrap().unwrap();
        assert_eq!(then["name"], FieldValue::from("bolt"));
        assert!(!ValidityWindow::of(&then).is_open());
    }

    #[test]
    fn invalid_revision_writes_nothing() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        let (id, _) = store.create_node(&widget, payload! { "name" => "bolt" }).unwrap();

        assert_matches!(
            store.revise(&widget, &id, payload! { "name" => FieldValue::Null }),
            Err(NodeStoreError::ValidationFailed { .. })
        );
        assert_eq!(store.history(&widget, &id).unwrap().len(), 1);
    }
}

mod configuration {
    use super::*;

    #[test]
    fn saved_schemas_are_loaded_on_reopen() {
        common::init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path().join("data"))
            .metadata_dir(Some(dir.path().join("metadata")))
            .use_fsync(false)
            .build();

        {
            let store = NodeStore::open(config.clone()).unwrap();
            common::register_widget_chain(store.catalog());
            store.save_schema(&common::widget()).unwrap();
        }
        assert!(dir.path().join("metadata/masterdata/widget.json").is_file());

        let store = NodeStore::open(config).unwrap();
        assert_eq!(store.catalog().latest_version_number(&common::widget()), 2);
        let id = NodeId::from("1");
        store
            .create(&common::widget(), &id, payload! { "name" => "bolt", "_schema_version" => 1 })
            .unwrap();
        assert_eq!(
            store.read(&common::widget(), &id).unwrap().unwrap()["status"],
            FieldValue::from("PENDING")
        );
    }

    #[test]
    fn save_schema_needs_a_metadata_dir() {
        let (store, _dir) = widget_store();
        assert_matches!(
            store.save_schema(&common::widget()),
            Err(NodeStoreError::InvalidSchema { path: None, .. })
        );
    }

    #[cfg(feature = "sled")]
    #[test]
    fn sled_backend_from_config() {
        common::init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .backend(BackendKind::Sled)
            .build();
        let store = NodeStore::open(config).unwrap();
        let widget = common::widget();
        store.create(&widget, &NodeId::from("7"), payload! { "name" => "bolt" }).unwrap();
        common::register_widget_chain(store.catalog());

        let current = store.read(&widget, &NodeId::from("7")).unwrap().unwrap();
        assert_eq!(current["status"], FieldValue::from("PENDING"));
        let (id, _) = store.create_node(&widget, payload! { "name" => "nut" }).unwrap();
        assert_eq!(id, NodeId::from("1"));
        assert_eq!(store.history(&widget, &NodeId::from("7")).unwrap().len(), 2);
    }

    #[cfg(not(feature = "sled"))]
    #[test]
    fn sled_backend_requires_the_feature() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .backend(BackendKind::Sled)
            .build();
        assert_matches!(
            NodeStore::open(config),
            Err(NodeStoreError::UnsupportedBackend(_))
        );
    }
}
