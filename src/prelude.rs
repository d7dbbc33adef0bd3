//! Prelude module for convenient imports.
//!
//! ```rust
//! use versioned_node_store::prelude::*;
//! ```

pub use crate::config::{BackendKind, StoreConfig};
pub use crate::counter::IdAllocator;
pub use crate::databases::{FileStore, RecordBackend};
pub use crate::errors::{FieldViolation, NodeStoreError, NodeStoreResult};
pub use crate::keys::{NodeId, NodeType};
pub use crate::node_store::NodeStore;
pub use crate::payload;
pub use crate::record::RecordSnapshot;
pub use crate::schema::{
    Constraints, FieldDefinition, FieldUpgradeDefinition, SchemaCatalog, SchemaVersion,
    UpgradeStrategy, ValidationMode,
};
pub use crate::store::VersionedRecordStore;
pub use crate::upgrade::{
    BatchUpgradeSummary, TransformRegistry, UpgradeEngine, UpgradeResult, UpgradeStatus,
};
pub use crate::value::{FieldType, FieldValue, Payload};

#[cfg(feature = "sled")]
pub use crate::databases::SledStore;
