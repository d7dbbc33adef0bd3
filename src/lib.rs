//! # Versioned Node Store
//!
//! An append-only record store whose records ("nodes") carry a schema
//! version and are migrated forward as their node type's schema evolves.
//!
//! ## Features
//!
//! - **Append-Only**: every create, update and upgrade appends an immutable snapshot
//! - **Schema Evolution**: per node type version chains with add/remove/rename/transform steps
//! - **Upgrade-on-Read**: callers always see data in the latest schema version
//! - **Batch Upgrades**: whole node types migrated on a bounded worker pool
//! - **Two Backends**: JSON files on disk, or a sled database
//!
//! ## Quick Start
//!
//! ```rust
//! use versioned_node_store::prelude::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = NodeStore::open(StoreConfig::new(dir.path())).unwrap();
//! let orders = NodeType::new("finance/sales_order").unwrap();
//!
//! let (id, _) = store.create_node(&orders, payload! { "customer" => "ACME" }).unwrap();
//! store.revise(&orders, &id, payload! { "customer" => "ACME Corp" }).unwrap();
//!
//! let current = store.read(&orders, &id).unwrap().unwrap();
//! assert_eq!(current["customer"], FieldValue::from("ACME Corp"));
//! assert_eq!(store.history(&orders, &id).unwrap().len(), 3);
//! ```

pub mod config;
pub mod counter;
pub mod databases;
pub mod errors;
pub mod keys;
pub mod node_store;
pub mod prelude;
pub mod record;
pub mod schema;
pub mod store;
pub mod upgrade;
pub mod utils;
pub mod validity;
pub mod value;

pub use errors::{NodeStoreError, NodeStoreResult};
pub use keys::{NodeId, NodeType, RecordKey};
pub use node_store::NodeStore;
pub use record::RecordSnapshot;
pub use value::{FieldType, FieldValue, Payload};
