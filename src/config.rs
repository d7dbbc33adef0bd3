//! Store configuration.
//!
//! Built with `typed-builder`; [`StoreConfig::new`] gives the defaults for a
//! data directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};
use typed_builder::TypedBuilder;

/// Where snapshot logs and counters are kept.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// One JSON file per node plus one counter file per node type.
    #[default]
    File,
    /// A sled database in `data_dir`.
    Sled,
}

/// Configuration for a [`NodeStore`](crate::NodeStore).
///
/// # Examples
///
/// ```
/// use versioned_node_store::config::{BackendKind, StoreConfig};
///
/// // Create with defaults
/// let config = StoreConfig::new("data");
/// assert_eq!(config.backend, BackendKind::File);
///
/// // Customize options
/// let config = StoreConfig::builder()
///     .data_dir("/var/lib/nodes")
///     .metadata_dir(Some("/etc/nodes/metadata".into()))
///     .upgrade_workers(8)
///     .owner_id(Some("importer".into()))
///     .build();
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct StoreConfig {
    /// Root directory for stored records
    #[builder(setter(into))]
    pub data_dir: PathBuf,

    /// Directory holding schema definition files, one per node type
    #[builder(default)]
    pub metadata_dir: Option<PathBuf>,

    #[builder(default)]
    pub backend: BackendKind,

    /// Worker threads used by `upgrade_all`
    #[builder(default = 4)]
    pub upgrade_workers: usize,

    /// Enable fsync for durability (may impact performance)
    #[builder(default = true)]
    pub use_fsync: bool,

    /// Stamped on every snapshot this store writes
    #[builder(default)]
    pub owner_id: Option<String>,

    /// Load every schema file under `metadata_dir` when the store opens
    #[builder(default = true)]
    pub load_schemas_on_open: bool,
}

impl StoreConfig {
    /// Create a basic configuration with just a data directory
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            metadata_dir: None,
            backend: BackendKind::File,
            upgrade_workers: 4,
            use_fsync: true,
            owner_id: None,
            load_schemas_on_open: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::builder()
            .data_dir("/tmp/nodes")
            .backend(BackendKind::Sled)
            .upgrade_workers(2)
            .use_fsync(false)
            .build();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/nodes"));
        assert_eq!(config.backend, BackendKind::Sled);
        assert_eq!(config.upgrade_workers, 2);
        assert!(!config.use_fsync);
        assert!(config.load_schemas_on_open);
    }

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::new("/tmp/default");
        assert_eq!(config.upgrade_workers, 4);
        assert!(config.use_fsync);
        assert_eq!(config.metadata_dir, None);
        assert_eq!(config.owner_id, None);
    }

    #[test]
    fn test_backend_kind_from_text() {
        assert_eq!(BackendKind::from_str("SLED").unwrap(), BackendKind::Sled);
        assert_eq!(BackendKind::File.to_string(), "file");
        assert!(BackendKind::from_str("redis").is_err());
    }
}
