use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{NodeStoreError, NodeStoreResult};
use crate::keys::NodeType;
use crate::schema::{SchemaVersion, UpgradeStrategy};

#[derive(Debug, Default)]
struct TypeChain {
    versions: BTreeMap<u32, Arc<SchemaVersion>>,
    strategies: BTreeMap<u32, Arc<UpgradeStrategy>>,
}

/// Registry of schema versions and upgrade strategies, per node type.
///
/// The catalog is an explicit instance shared by reference; lookups hand out
/// `Arc`s so callers never hold the lock across an upgrade.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    chains: RwLock<HashMap<NodeType, TypeChain>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a version under its number.
    ///
    /// Chain completeness is not checked here; the upgrade engine deals with
    /// gaps when it walks the chain.
    pub fn register_version(&self, node_type: &NodeType, version: SchemaVersion) {
        let mut chains = self.chains.write();
        chains
            .entry(node_type.clone())
            .or_default()
            .versions
            .insert(version.version(), Arc::new(version));
    }

    /// Insert or overwrite the strategy leaving `strategy.from_version`.
    pub fn register_strategy(&self, node_type: &NodeType, strategy: UpgradeStrategy) {
        let mut chains = self.chains.write();
        chains
            .entry(node_type.clone())
            .or_default()
            .strategies
            .insert(strategy.from_version, Arc::new(strategy));
    }

    pub fn get_version(&self, node_type: &NodeType, version: u32) -> Option<Arc<SchemaVersion>> {
        let chains = self.chains.read();
        chains.get(node_type)?.versions.get(&version).cloned()
    }

    /// Highest registered version, or `None` for an unregistered type.
    pub fn get_latest(&self, node_type: &NodeType) -> Option<Arc<SchemaVersion>> {
        let chains = self.chains.read();
        chains
            .get(node_type)?
            .versions
            .last_key_value()
            .map(|(_, v)| Arc::clone(v))
    }

    /// Latest version number; unregistered types are at version 1.
    pub fn latest_version_number(&self, node_type: &NodeType) -> u32 {
        self.get_latest(node_type).map_or(1, |v| v.version())
    }

    /// Look a version up for validation or normalisation.
    ///
    /// Version 1 of a type with no registered version 1 resolves to the
    /// empty unversioned schema. Any other missing version is an error.
    pub fn resolve_version(
        &self,
        node_type: &NodeType,
        version: u32,
    ) -> NodeStoreResult<Arc<SchemaVersion>> {
        match self.get_version(node_type, version) {
            Some(schema) => Ok(schema),
            None if version == 1 => Ok(Arc::new(SchemaVersion::unversioned())),
            None => Err(NodeStoreError::SchemaVersionNotFound {
                node_type: node_type.to_string(),
                version,
            }),
        }
    }

    /// The rule that moves a record from `from_version` to `from_version + 1`.
    pub fn get_strategy(
        &self,
        node_type: &NodeType,
        from_version: u32,
    ) -> Option<Arc<UpgradeStrategy>> {
        let chains = self.chains.read();
        chains.get(node_type)?.strategies.get(&from_version).cloned()
    }

    pub fn node_types(&self) -> Vec<NodeType> {
        let mut types: Vec<_> = self.chains.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// All registered versions of a type, ascending.
    pub fn versions(&self, node_type: &NodeType) -> Vec<Arc<SchemaVersion>> {
        self.chains
            .read()
            .get(node_type)
            .map(|chain| chain.versions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All registered strategies of a type, ordered by source version.
    pub fn strategies(&self, node_type: &NodeType) -> Vec<Arc<UpgradeStrategy>> {
        self.chains
            .read()
            .get(node_type)
            .map(|chain| chain.strategies.values().cloned().collect())
            .unwrap_or_default()
    }
}
