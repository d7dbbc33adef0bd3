//! Upgrade engine: single records, upgrade-on-read and batch upgrades.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;
use proptest::prelude::*;
use versioned_node_store::databases::FileStore;
use versioned_node_store::schema::{FieldDefinition, SchemaCatalog, SchemaVersion, UpgradeStrategy};
use versioned_node_store::upgrade::{BatchUpgradeSummary, UpgradeStatus};
use versioned_node_store::{
    FieldType, FieldValue, NodeId, NodeStore, NodeStoreError, Payload, RecordKey, payload,
};

/// v3 renames `name` to `title`, upper-cases it and drops `legacy`.
fn register_widget_v3(catalog: &SchemaCatalog) {
    let widget = common::widget();
    catalog.register_version(
        &widget,
        SchemaVersion::new(
            3,
            "title",
            [
                common::string_field("title", true),
                common::string_field("status", false),
                FieldDefinition::builder()
                    .name("qty")
                    .field_type(FieldType::Integer)
                    .build(),
            ],
        )
        .unwrap(),
    );
    catalog.register_strategy(
        &widget,
        UpgradeStrategy::new(2)
            .rename_field("name", "title")
            .remove_field("legacy")
            .transform("title", "uppercase"),
    );
}

fn widget_store() -> (NodeStore, tempfile::TempDir) {
    let (store, dir) = common::file_node_store();
    common::register_widget_chain(store.catalog());
    (store, dir)
}

mod single_record {
    use super::*;

    #[test]
    fn read_upgrades_and_persists_once() {
        let (store, _dir) = common::file_node_store();
        let widget = common::widget();
        let id = NodeId::from("1");
        store.create(&widget, &id, payload! { "name" => "Widget" }).unwrap();

        common::register_widget_chain(store.catalog());
        let current = store.read(&widget, &id).unwrap().unwrap();
        assert_eq!(current["name"], FieldValue::from("Widget"));
        assert_eq!(current["status"], FieldValue::from("PENDING"));
        assert_eq!(current["_schema_version"], FieldValue::Integer(2));

        // the second read finds the record current and writes nothing
        store.read(&widget, &id).unwrap();
        let history = store.history(&widget, &id).unwrap();
        let versions: Vec<u32> = history.iter().map(|s| s.schema_version).collect();
        assert_eq!(versions, [1, 2]);
        assert!(!history[0].payload.contains_key("status"));
    }

    #[test]
    fn explicit_upgrade_reports_steps() {
        let (store, _dir) = widget_store();
        register_widget_v3(store.catalog());
        let widget = common::widget();
        let id = NodeId::from("1");
        store
            .create(
                &widget,
                &id,
                payload! { "name" => "bolt", "legacy" => "X1", "qty" => "7", "_schema_version" => 1 },
            )
            .unwrap();

        let result = store.upgrade_record(&widget, &id, None);
        assert_eq!(result.status, UpgradeStatus::Success);
        assert_eq!((result.from_version, result.to_version), (1, 3));
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps.iter().all(|s| s.applied));
        let changed: Vec<_> = result.changed_fields.iter().map(String::as_str).collect();
        assert_eq!(changed, ["legacy", "name", "status", "title"]);

        let current = store.read(&widget, &id).unwrap().unwrap();
        assert_eq!(current["title"], FieldValue::from("BOLT"));
        assert_eq!(current["qty"], FieldValue::Integer(7));
        assert!(!current.contains_key("name"));
        assert!(!current.contains_key("legacy"));
    }

    #[test]
    fn current_record_is_not_needed() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        let id = NodeId::from("1");
        store
            .create(&widget, &id, payload! { "name" => "Widget", "_schema_version" => 2 })
            .unwrap();

        let result = store.upgrade_record(&widget, &id, None);
        assert_eq!(result.status, UpgradeStatus::NotNeeded);
        assert_eq!((result.from_version, result.to_version), (2, 2));
        assert_eq!(store.history(&widget, &id).unwrap().len(), 1);

        // asking for an older target is not a downgrade, just nothing to do
        let result = store.upgrade_record(&widget, &id, Some(1));
        assert_eq!(result.status, UpgradeStatus::NotNeeded);
    }

    #[test]
    fn missing_node_fails() {
        let (store, _dir) = widget_store();
        let result = store.upgrade_record(&common::widget(), &NodeId::from("404"), None);
        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("not found"));
        assert_matches!(
            store.engine().try_upgrade(&common::widget(), &NodeId::from("404"), None),
            Err(NodeStoreError::NodeNotFound { .. })
        );
    }

    #[test]
    fn missing_strategy_is_skipped() {
        let (store, _dir) = common::file_node_store();
        let widget = common::widget();
        let id = NodeId::from("1");
        store.create(&widget, &id, payload! { "name" => "Widget" }).unwrap();

        let result = store.upgrade_record(&widget, &id, Some(3));
        assert!(result.is_success());
        assert!(result.steps.iter().all(|s| !s.applied));
        let latest = store.store().read_latest(&widget, &id).unwrap().unwrap();
        assert_eq!(latest.schema_version, 3);
        assert_eq!(latest.data(), payload! { "name" => "Widget" });
    }

    #[test]
    fn unregistered_transform_leaves_value() {
        let (store, _dir) = common::file_node_store();
        let widget = common::widget();
        store
            .catalog()
            .register_strategy(&widget, UpgradeStrategy::new(1).transform("name", "no_such_transform"));
        let id = NodeId::from("1");
        store.create(&widget, &id, payload! { "name" => "Widget" }).unwrap();

        let result = store.upgrade_record(&widget, &id, Some(2));
        assert!(result.is_success());
        assert!(result.changed_fields.is_empty());
        let latest = store.store().read_latest(&widget, &id).unwrap().unwrap();
        assert_eq!(latest.payload["name"], FieldValue::from("Widget"));
    }

    #[test]
    fn failing_transform_writes_nothing() {
        let (store, _dir) = widget_store();
        register_widget_v3(store.catalog());
        store
            .transforms()
            .register("uppercase", |_| Err("refusing to shout".to_string()));
        let widget = common::widget();
        let id = NodeId::from("1");
        store
            .create(&widget, &id, payload! { "name" => "Widget", "_schema_version" => 1 })
            .unwrap();

        let result = store.upgrade_record(&widget, &id, None);
        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("refusing to shout"));
        assert_matches!(
            store.read(&widget, &id),
            Err(NodeStoreError::Transform { name, .. }) if name == "uppercase"
        );
        // the v1 -> v2 step succeeded in memory but was never persisted
        let history = store.history(&widget, &id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].schema_version, 1);
    }

    #[test]
    fn unsatisfied_target_breaks_the_chain() {
        let (store, _dir) = widget_store();
        let widget = common::widget();
        store.catalog().register_version(
            &widget,
            SchemaVersion::new(3, "sku", [common::string_field("sku", true)]).unwrap(),
        );
        let id = NodeId::from("1");
        store.create(&widget, &id, payload! { "name" => "Widget" }).unwrap();

        assert_matches!(
            store.engine().try_upgrade(&widget, &id, None),
            Err(NodeStoreError::SchemaChainBroken { from: 1, to: 3, .. })
        );
        assert_eq!(store.history(&widget, &id).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_readers_upgrade_once() {
        let (store, _dir) = common::file_node_store();
        let widget = common::widget();
        let id = NodeId::from("1");
        store.create(&widget, &id, payload! { "name" => "Widget" }).unwrap();
        common::register_widget_chain(store.catalog());

        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                thread::spawn(move || store.read(&common::widget(), &id).unwrap().unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap()["status"], FieldValue::from("PENDING"));
        }
        assert_eq!(store.history(&widget, &id).unwrap().len(), 2);
    }
}

mod batch {
    use super::*;

    #[test]
    fn one_corrupt_record_does_not_stop_the_batch() {
        let (store, dir) = common::file_node_store();
        let widget = common::widget();
        for n in 1..=99u64 {
            store
                .create(&widget, &NodeId::from(n), payload! { "name" => format!("widget {n}") })
                .unwrap();
        }
        let files = FileStore::open(dir.path().join("data"), false).unwrap();
        let corrupt = RecordKey::new(&widget, &NodeId::from("100")).unwrap();
        fs::write(files.log_path(&corrupt), "{ this is not json").unwrap();
        common::register_widget_chain(store.catalog());

        let results = store.upgrade_all(&widget, None).unwrap();
        assert_eq!(results.len(), 100);
        let summary = BatchUpgradeSummary::from_results(&results);
        assert_eq!(summary.succeeded, 99);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].node_id, NodeId::from("100"));
        assert!(summary.has_errors());

        for n in [1u64, 50, 99] {
            let latest = store.store().read_latest(&widget, &NodeId::from(n)).unwrap().unwrap();
            assert_eq!(latest.schema_version, 2);
            assert_eq!(latest.payload["status"], FieldValue::from("PENDING"));
        }

        // a second pass has nothing left to do
        let summary = BatchUpgradeSummary::from_results(&store.upgrade_all(&widget, None).unwrap());
        assert_eq!((summary.succeeded, summary.not_needed, summary.failed), (0, 99, 1));
        assert_eq!(summary.total(), 100);
    }

    #[test]
    fn empty_node_type_is_an_empty_batch() {
        let (store, _dir) = widget_store();
        assert!(store.upgrade_all(&common::widget(), None).unwrap().is_empty());
    }
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    (
        "[a-z ]{1,12}",
        proptest::option::of("[A-Z0-9]{2,4}"),
        proptest::option::of(0i64..1000),
    )
        .prop_map(|(name, legacy, qty)| {
            let mut payload = payload! { "name" => name };
            if let Some(legacy) = legacy {
                payload.insert("legacy".into(), FieldValue::from(legacy));
            }
            if let Some(qty) = qty {
                // stored as text, typed by normalization
                payload.insert("qty".into(), FieldValue::from(qty.to_string()));
            }
            payload
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn upgrading_in_one_go_equals_upgrading_step_by_step(payload in payload_strategy()) {
        let catalog = SchemaCatalog::new();
        common::register_widget_chain(&catalog);
        register_widget_v3(&catalog);
        let dir = tempfile::tempdir().unwrap();
        let records = common::file_record_store(dir.path());
        let transforms = versioned_node_store::upgrade::TransformRegistry::new();
        let engine = versioned_node_store::upgrade::UpgradeEngine::new(&catalog, &records, &transforms);
        let widget = common::widget();

        let direct = engine.migrate(&widget, payload.clone(), 1, 3).unwrap();
        let halfway = engine.migrate(&widget, payload, 1, 2).unwrap();
        let stepwise = engine.migrate(&widget, halfway.payload, 2, 3).unwrap();

        prop_assert_eq!(&direct.payload, &stepwise.payload);
        prop_assert_eq!(direct.payload.get("_schema_version"), Some(&FieldValue::Integer(3)));
        prop_assert!(!direct.payload.contains_key("name"));
    }
}
