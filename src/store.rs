//! Append-only snapshot logs on top of a [`RecordBackend`].
//!
//! ```
//! use versioned_node_store::store::VersionedRecordStore;
//! use versioned_node_store::{NodeId, NodeType, payload};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = VersionedRecordStore::file(dir.path(), false).unwrap();
//! let product = NodeType::new("masterdata/product").unwrap();
//! let id = NodeId::from("1");
//!
//! store.create(&product, &id, payload! { "name" => "Widget" }).unwrap();
//! store.append(&product, &id, payload! { "name" => "Gadget" }, 1, None).unwrap();
//!
//! assert_eq!(store.history(&product, &id).unwrap().len(), 2);
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::databases::{FileStore, RecordBackend, SlotWrite};
use crate::errors::{NodeStoreError, NodeStoreResult};
use crate::keys::{NodeId, NodeType, RecordKey};
use crate::record::{RecordSnapshot, set_version_tag, version_tag};
use crate::utils::KeyedLocks;
use crate::value::Payload;

/// Persists each node as an ordered log of immutable snapshots.
///
/// Writes to one node are serialized by an in-process lock, and every append
/// is checked against the sequence number it expects to follow, so two
/// writers can never both extend the same log position.
pub struct VersionedRecordStore {
    backend: Arc<dyn RecordBackend>,
    locks: KeyedLocks<RecordKey>,
    owner_id: Option<String>,
}

impl VersionedRecordStore {
    pub fn from_backend(backend: Arc<dyn RecordBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
            owner_id: None,
        }
    }

    /// JSON files under `path`.
    pub fn file<P: AsRef<Path>>(path: P, use_fsync: bool) -> NodeStoreResult<Self> {
        Ok(Self::from_backend(Arc::new(FileStore::open(path, use_fsync)?)))
    }

    /// A sled database at `path`.
    #[cfg(feature = "sled")]
    pub fn sled<P: AsRef<Path>>(path: P) -> NodeStoreResult<Self> {
        Ok(Self::from_backend(Arc::new(
            crate::databases::SledStore::new(path)?,
        )))
    }

    /// A temporary sled database (useful for testing)
    #[cfg(feature = "sled")]
    pub fn temp() -> NodeStoreResult<Self> {
        Ok(Self::from_backend(Arc::new(
            crate::databases::SledStore::temp()?,
        )))
    }

    /// Stamp `owner_id` on every snapshot written from now on.
    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    /// Write the first snapshot of a node.
    ///
    /// The schema version is taken from the payload's `_schema_version`
    /// tag, defaulting to 1. Fails with `AlreadyExists` if the node has a log.
    pub fn create(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        mut payload: Payload,
    ) -> NodeStoreResult<RecordSnapshot> {
        let key = RecordKey::new(node_type, id)?;
        let already_exists = || NodeStoreError::AlreadyExists {
            node_type: node_type.to_string(),
            id: id.to_string(),
        };

        self.locks.with(&key, || {
            if self.backend.read_latest(&key)?.is_some() {
                return Err(already_exists());
            }
            let schema_version = version_tag(&payload).unwrap_or(1);
            set_version_tag(&mut payload, schema_version);
            let now = Utc::now();
            let snapshot = RecordSnapshot {
                payload,
                schema_version,
                created_at: now,
                updated_at: now,
                sequence_number: 1,
                owner_id: self.owner_id.clone(),
            };
            match self.backend.write_snapshot(&key, &snapshot)? {
                SlotWrite::Written => {
                    debug!("Created {key} at schema v{schema_version}");
                    Ok(snapshot)
                }
                SlotWrite::Occupied => Err(already_exists()),
            }
        })
    }

    /// Append a new snapshot to an existing node.
    ///
    /// `expected_sequence` is the sequence number of the snapshot the caller
    /// based its payload on; if another snapshot has been appended since, the
    /// call fails with `ConcurrentModification` and nothing is written.
    pub fn append(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        mut payload: Payload,
        schema_version: u32,
        expected_sequence: Option<u64>,
    ) -> NodeStoreResult<RecordSnapshot> {
        let key = RecordKey::new(node_type, id)?;

        self.locks.with(&key, || {
            let latest = self.backend.read_latest(&key)?.ok_or_else(|| {
                NodeStoreError::NodeNotFound {
                    node_type: node_type.to_string(),
                    id: id.to_string(),
                }
            })?;
            let conflict = |found: u64| NodeStoreError::ConcurrentModification {
                node_type: node_type.to_string(),
                id: id.to_string(),
                expected: expected_sequence.unwrap_or(latest.sequence_number),
                found,
            };
            if expected_sequence.is_some_and(|expected| expected != latest.sequence_number) {
                return Err(conflict(latest.sequence_number));
            }
            if schema_version < latest.schema_version {
                return Err(NodeStoreError::DowngradeRejected {
                    node_type: node_type.to_string(),
                    id: id.to_string(),
                    stored: latest.schema_version,
                    requested: schema_version,
                });
            }

            set_version_tag(&mut payload, schema_version);
            let snapshot = RecordSnapshot {
                payload,
                schema_version,
                created_at: latest.created_at,
                updated_at: Utc::now().max(latest.updated_at),
                sequence_number: latest.sequence_number + 1,
                owner_id: self.owner_id.clone(),
            };
            match self.backend.write_snapshot(&key, &snapshot)? {
                SlotWrite::Written => {
                    debug!(
                        "Appended snapshot #{} to {key} at schema v{schema_version}",
                        snapshot.sequence_number
                    );
                    Ok(snapshot)
                }
                SlotWrite::Occupied => Err(conflict(snapshot.sequence_number)),
            }
        })
    }

    pub fn read_latest(
        &self,
        node_type: &NodeType,
        id: &NodeId,
    ) -> NodeStoreResult<Option<RecordSnapshot>> {
        self.backend.read_latest(&RecordKey::new(node_type, id)?)
    }

    /// The full snapshot log, oldest first. Empty if the node does not exist.
    pub fn history(&self, node_type: &NodeType, id: &NodeId) -> NodeStoreResult<Vec<RecordSnapshot>> {
        self.backend.read_log(&RecordKey::new(node_type, id)?)
    }

    pub fn exists(&self, node_type: &NodeType, id: &NodeId) -> NodeStoreResult<bool> {
        Ok(self.read_latest(node_type, id)?.is_some())
    }

    /// Ids of every stored node of a type. Order is unspecified.
    pub fn list_ids(&self, node_type: &NodeType) -> NodeStoreResult<Vec<NodeId>> {
        self.backend.list_ids(node_type)
    }

    pub fn list_node_types(&self) -> NodeStoreResult<Vec<NodeType>> {
        self.backend.list_node_types()
    }

    pub fn flush(&self) -> NodeStoreResult<()> {
        self.backend.flush()
    }
}
