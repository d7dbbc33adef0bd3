//! The store facade: schema-aware create, read, update and query.
//!
//! Reads are upgrade-on-read: a record stored under an older schema version
//! is migrated and the migrated snapshot appended *before* the read returns,
//! so a read may write. The write is a normal upgrade and is safe to retry.
//!
//! ```
//! use versioned_node_store::config::StoreConfig;
//! use versioned_node_store::schema::{FieldDefinition, FieldUpgradeDefinition, SchemaVersion, UpgradeStrategy};
//! use versioned_node_store::{FieldType, FieldValue, NodeId, NodeStore, NodeType, payload};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = NodeStore::open(StoreConfig::new(dir.path())).unwrap();
//! let product = NodeType::new("masterdata/product").unwrap();
//!
//! let name = FieldDefinition::builder().name("name").field_type(FieldType::String).required(true).build();
//! store.catalog().register_version(&product, SchemaVersion::new(1, "initial", [name]).unwrap());
//! store.create(&product, &NodeId::from("1"), payload! { "name" => "Widget" }).unwrap();
//!
//! // a second version adds a status field
//! let status = FieldDefinition::builder().name("status").field_type(FieldType::String).build();
//! let name = FieldDefinition::builder().name("name").field_type(FieldType::String).build();
//! store.catalog().register_version(&product, SchemaVersion::new(2, "status", [name, status]).unwrap());
//! store.catalog().register_strategy(
//!     &product,
//!     UpgradeStrategy::new(1).add_field(
//!         FieldUpgradeDefinition::builder()
//!             .name("status")
//!             .field_type(FieldType::String)
//!             .default_value("PENDING")
//!             .build(),
//!     ),
//! );
//!
//! let widget = store.read(&product, &NodeId::from("1")).unwrap().unwrap();
//! assert_eq!(widget["status"], FieldValue::from("PENDING"));
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::{BackendKind, StoreConfig};
use crate::counter::IdAllocator;
use crate::databases::{FileStore, RecordBackend};
use crate::errors::{NodeStoreError, NodeStoreResult};
use crate::keys::{NodeId, NodeType};
use crate::record::{RecordSnapshot, SCHEMA_VERSION_FIELD, set_version_tag, version_tag};
use crate::schema::{self, SchemaCatalog, Validator};
use crate::store::VersionedRecordStore;
use crate::upgrade::{TransformRegistry, UpgradeEngine, UpgradeResult};
use crate::validity::{self, ID_FIELD, ValidityWindow};
use crate::value::{FieldValue, Payload};

/// Composes the schema catalog, the record store, the id allocator and the
/// upgrade engine.
pub struct NodeStore {
    config: StoreConfig,
    catalog: SchemaCatalog,
    store: VersionedRecordStore,
    ids: IdAllocator,
    transforms: TransformRegistry,
}

impl NodeStore {
    /// Open the backend named in `config` and, if configured, load every
    /// schema file under `metadata_dir`.
    pub fn open(config: StoreConfig) -> NodeStoreResult<Self> {
        let backend: Arc<dyn RecordBackend> = match config.backend {
            BackendKind::File => Arc::new(FileStore::open(&config.data_dir, config.use_fsync)?),
            #[cfg(feature = "sled")]
            BackendKind::Sled => Arc::new(crate::databases::SledStore::new(&config.data_dir)?),
            #[cfg(not(feature = "sled"))]
            BackendKind::Sled => {
                return Err(NodeStoreError::UnsupportedBackend(BackendKind::Sled.to_string()));
            }
        };
        Self::with_backend(config, backend)
    }

    /// Like [`NodeStore::open`] over an already constructed backend.
    pub fn with_backend(
        config: StoreConfig,
        backend: Arc<dyn RecordBackend>,
    ) -> NodeStoreResult<Self> {
        let catalog = SchemaCatalog::new();
        if config.load_schemas_on_open
            && let Some(dir) = config.metadata_dir.as_ref().filter(|dir| dir.is_dir())
        {
            let loaded = schema::load_dir(&catalog, dir)?;
            info!("Loaded schemas for {} node type(s) from {}", loaded.len(), dir.display());
        }
        let store =
            VersionedRecordStore::from_backend(Arc::clone(&backend)).with_owner(config.owner_id.clone());
        Ok(Self {
            ids: IdAllocator::new(backend),
            config,
            catalog,
            store,
            transforms: TransformRegistry::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &VersionedRecordStore {
        &self.store
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    pub fn engine(&self) -> UpgradeEngine<'_> {
        UpgradeEngine::new(&self.catalog, &self.store, &self.transforms)
    }

    /// Write a node type's schema chain to `<metadata_dir>/<node_type>.json`.
    pub fn save_schema(&self, node_type: &NodeType) -> NodeStoreResult<()> {
        let Some(dir) = &self.config.metadata_dir else {
            return Err(NodeStoreError::InvalidSchema {
                path: None,
                reason: "no metadata directory configured".into(),
            });
        };
        let path = node_type
            .segments()
            .fold(dir.clone(), |path, segment| path.join(segment))
            .with_extension("json");
        schema::save_file(&self.catalog, node_type, path)
    }

    /// Validate `payload` against the version named by its `_schema_version`
    /// tag (version 1 if untagged). Coercing fields are rewritten in place.
    /// With `strict`, fields the schema does not declare are violations.
    pub fn validate(
        &self,
        node_type: &NodeType,
        payload: &mut Payload,
        strict: bool,
    ) -> NodeStoreResult<()> {
        let version = version_tag(payload).unwrap_or(1);
        self.validate_at(node_type, payload, version, strict)
    }

    fn validate_at(
        &self,
        node_type: &NodeType,
        payload: &mut Payload,
        version: u32,
        strict: bool,
    ) -> NodeStoreResult<()> {
        let schema = self.catalog.resolve_version(node_type, version)?;
        Validator::new(&schema)
            .reject_unknown(strict)
            .validate(payload)
            .map_err(|violations| NodeStoreError::ValidationFailed {
                node_type: node_type.to_string(),
                violations,
            })
    }

    /// Validate and store the first snapshot of a node.
    pub fn create(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        mut data: Payload,
    ) -> NodeStoreResult<Payload> {
        self.validate(node_type, &mut data, false)?;
        Ok(self.store.create(node_type, id, data)?.payload)
    }

    /// Current payload of a node, migrated to the latest schema version.
    pub fn read(&self, node_type: &NodeType, id: &NodeId) -> NodeStoreResult<Option<Payload>> {
        Ok(self.read_snapshot(node_type, id)?.map(|s| s.payload))
    }

    /// Latest snapshot of a node, migrated to the latest schema version.
    pub fn read_snapshot(
        &self,
        node_type: &NodeType,
        id: &NodeId,
    ) -> NodeStoreResult<Option<RecordSnapshot>> {
        let Some(latest) = self.store.read_latest(node_type, id)? else {
            return Ok(None);
        };
        let mut snapshot = if latest.schema_version < self.catalog.latest_version_number(node_type) {
            match self.engine().try_upgrade(node_type, id, None) {
                // a concurrent writer got there first; its snapshot is read below
                Ok(_) | Err(NodeStoreError::ConcurrentModification { .. }) => {}
                Err(e) => return Err(e),
            }
            self.store
                .read_latest(node_type, id)?
                .ok_or_else(|| not_found(node_type, id))?
        } else {
            latest
        };
        if let Some(schema) = self.catalog.get_version(node_type, snapshot.schema_version) {
            schema.normalize(&mut snapshot.payload);
        }
        Ok(Some(snapshot))
    }

    /// Merge `changes` over the current payload and append the result.
    pub fn update(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        changes: Payload,
    ) -> NodeStoreResult<Payload> {
        let current = self
            .read_snapshot(node_type, id)?
            .ok_or_else(|| not_found(node_type, id))?;
        let version = current.schema_version;
        let mut merged = merge(current.payload, changes);
        self.validate_at(node_type, &mut merged, version, false)?;
        let snapshot =
            self.store
                .append(node_type, id, merged, version, Some(current.sequence_number))?;
        Ok(snapshot.payload)
    }

    /// Every node of a type whose current payload matches `predicate`.
    ///
    /// A linear scan with upgrade-on-read; there is no index.
    pub fn query<F>(&self, node_type: &NodeType, predicate: F) -> NodeStoreResult<Vec<(NodeId, Payload)>>
    where
        F: Fn(&Payload) -> bool,
    {
        let mut matches = Vec::new();
        for id in self.store.list_ids(node_type)? {
            if let Some(payload) = self.read(node_type, &id)?
                && predicate(&payload)
            {
                matches.push((id, payload));
            }
        }
        Ok(matches)
    }

    /// Nodes whose fields equal every entry of `criteria`.
    pub fn query_by_fields(
        &self,
        node_type: &NodeType,
        criteria: &Payload,
    ) -> NodeStoreResult<Vec<(NodeId, Payload)>> {
        // declared fields are normalized, so only undeclared ones compare by text
        let schema = self.catalog.get_latest(node_type);
        let declared = |name: &str| schema.as_ref().is_some_and(|s| s.field(name).is_some());
        self.query(node_type, |payload| {
            criteria.iter().all(|(name, expected)| {
                payload
                    .get(name)
                    .is_some_and(|actual| {
                        actual == expected
                            || (!declared(name.as_str()) && actual.to_string() == expected.to_string())
                    })
            })
        })
    }

    /// Nodes whose current logical version is open.
    pub fn query_active(&self, node_type: &NodeType) -> NodeStoreResult<Vec<(NodeId, Payload)>> {
        self.query(node_type, validity::is_active)
    }

    /// Allocate an id and create an open logical version at the latest
    /// schema version.
    pub fn create_node(
        &self,
        node_type: &NodeType,
        mut data: Payload,
    ) -> NodeStoreResult<(NodeId, Payload)> {
        let id = NodeId::from(self.ids.next_id(node_type)?);
        data.insert(ID_FIELD.into(), FieldValue::from(id.to_string()));
        validity::open(&mut data, Utc::now());
        set_version_tag(&mut data, self.catalog.latest_version_number(node_type));
        let payload = self.create(node_type, &id, data)?;
        debug!("Created node {node_type}/{id}");
        Ok((id, payload))
    }

    /// Close the current logical version and open a new one carrying
    /// `changes`.
    ///
    /// These are two appends. A crash between them leaves the node with no
    /// open version until it is revised again.
    pub fn revise(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        changes: Payload,
    ) -> NodeStoreResult<Payload> {
        let current = self.read_active(node_type, id)?;
        let version = current.schema_version;
        let now = Utc::now();

        let mut opened = merge(current.payload.clone(), changes);
        opened.insert(ID_FIELD.into(), FieldValue::from(id.to_string()));
        validity::open(&mut opened, now);
        self.validate_at(node_type, &mut opened, version, false)?;

        let mut closed = current.payload;
        validity::close(&mut closed, now);
        let closed =
            self.store
                .append(node_type, id, closed, version, Some(current.sequence_number))?;
        let opened =
            self.store
                .append(node_type, id, opened, version, Some(closed.sequence_number))?;
        Ok(opened.payload)
    }

    /// Logical delete: append a copy of the current version with `date_to`
    /// set. The log itself is never shortened.
    pub fn retire(&self, node_type: &NodeType, id: &NodeId) -> NodeStoreResult<Payload> {
        let current = self.read_active(node_type, id)?;
        let mut closed = current.payload;
        validity::close(&mut closed, Utc::now());
        let snapshot = self.store.append(
            node_type,
            id,
            closed,
            current.schema_version,
            Some(current.sequence_number),
        )?;
        Ok(snapshot.payload)
    }

    /// The payload whose validity window contained `at`, migrated in memory
    /// to the latest schema version. Nothing is written.
    ///
    /// Only the newest snapshot that had started by `at` is considered, so a
    /// closing snapshot hides the open copies written before it.
    pub fn read_as_of(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        at: DateTime<Utc>,
    ) -> NodeStoreResult<Option<Payload>> {
        let history = self.store.history(node_type, id)?;
        let Some(snapshot) = history.into_iter().rev().find(|s| {
            ValidityWindow::of(&s.payload)
                .from
                .is_none_or(|from| from <= at)
        }) else {
            return Ok(None);
        };
        if !ValidityWindow::of(&snapshot.payload).contains(at) {
            return Ok(None);
        }
        let latest = self.catalog.latest_version_number(node_type);
        if snapshot.schema_version < latest {
            let migration =
                self.engine()
                    .migrate(node_type, snapshot.payload, snapshot.schema_version, latest)?;
            return Ok(Some(migration.payload));
        }
        let mut payload = snapshot.payload;
        if let Some(schema) = self.catalog.get_version(node_type, snapshot.schema_version) {
            schema.normalize(&mut payload);
        }
        Ok(Some(payload))
    }

    /// Every snapshot ever written for a node, oldest first, as stored.
    pub fn history(&self, node_type: &NodeType, id: &NodeId) -> NodeStoreResult<Vec<RecordSnapshot>> {
        self.store.history(node_type, id)
    }

    pub fn upgrade_record(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        target: Option<u32>,
    ) -> UpgradeResult {
        self.engine().upgrade_record(node_type, id, target)
    }

    /// Upgrade every node of a type on `upgrade_workers` threads.
    pub fn upgrade_all(
        &self,
        node_type: &NodeType,
        target: Option<u32>,
    ) -> NodeStoreResult<Vec<UpgradeResult>> {
        self.engine()
            .upgrade_all(node_type, target, self.config.upgrade_workers)
    }

    pub fn next_id(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        self.ids.next_id(node_type)
    }

    pub fn list_ids(&self, node_type: &NodeType) -> NodeStoreResult<Vec<NodeId>> {
        self.store.list_ids(node_type)
    }

    pub fn list_node_types(&self) -> NodeStoreResult<Vec<NodeType>> {
        self.store.list_node_types()
    }

    fn read_active(&self, node_type: &NodeType, id: &NodeId) -> NodeStoreResult<RecordSnapshot> {
        self.read_snapshot(node_type, id)?
            .filter(|s| validity::is_active(&s.payload))
            .ok_or_else(|| not_found(node_type, id))
    }
}

/// `changes` over `base`; a version tag in `changes` is ignored.
fn merge(mut base: Payload, changes: Payload) -> Payload {
    base.extend(
        changes
            .into_iter()
            .filter(|(name, _)| name != SCHEMA_VERSION_FIELD),
    );
    base
}

fn not_found(node_type: &NodeType, id: &NodeId) -> NodeStoreError {
    NodeStoreError::NodeNotFound {
        node_type: node_type.to_string(),
        id: id.to_string(),
    }
}
