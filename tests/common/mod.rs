// Common test utilities and helpers

#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;
use versioned_node_store::config::StoreConfig;
use versioned_node_store::schema::{
    FieldDefinition, FieldUpgradeDefinition, SchemaCatalog, SchemaVersion, UpgradeStrategy,
};
use versioned_node_store::store::VersionedRecordStore;
use versioned_node_store::{FieldType, NodeStore, NodeType};

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A file-backed facade in a fresh temporary directory. Keep the `TempDir`
/// alive for as long as the store is used.
pub fn file_node_store() -> (NodeStore, TempDir) {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let config = StoreConfig::builder()
        .data_dir(dir.path().join("data"))
        .use_fsync(false)
        .upgrade_workers(4)
        .build();
    let store = NodeStore::open(config).expect("open store");
    (store, dir)
}

pub fn file_record_store(dir: &Path) -> VersionedRecordStore {
    init_logging();
    VersionedRecordStore::file(dir, false).expect("open record store")
}

pub fn widget() -> NodeType {
    NodeType::new("masterdata/widget").expect("valid node type")
}

pub fn string_field(name: &str, required: bool) -> FieldDefinition {
    FieldDefinition::builder()
        .name(name)
        .field_type(FieldType::String)
        .required(required)
        .build()
}

/// v1 `{name}`; v2 adds `status` defaulting to `"PENDING"`.
pub fn register_widget_chain(catalog: &SchemaCatalog) {
    let widget = widget();
    catalog.register_version(
        &widget,
        SchemaVersion::new(1, "initial", [string_field("name", true)]).expect("v1"),
    );
    catalog.register_version(
        &widget,
        SchemaVersion::new(
            2,
            "adds status",
            [string_field("name", true), string_field("status", false)],
        )
        .expect("v2"),
    );
    catalog.register_strategy(
        &widget,
        UpgradeStrategy::new(1).add_field(
            FieldUpgradeDefinition::builder()
                .name("status")
                .field_type(FieldType::String)
                .default_value("PENDING")
                .build(),
        ),
    );
}
