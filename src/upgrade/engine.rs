use std::collections::{BTreeSet, HashSet};

use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::errors::{NodeStoreError, NodeStoreResult};
use crate::keys::{NodeId, NodeType};
use crate::record::set_version_tag;
use crate::schema::{SchemaCatalog, UpgradeStrategy, Validator};
use crate::store::VersionedRecordStore;
use crate::upgrade::{TransformRegistry, UpgradeResult, UpgradeStatus, UpgradeStep};
use crate::value::{FieldValue, Payload};

/// A payload walked forward in memory, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub payload: Payload,
    pub steps: Vec<UpgradeStep>,
    pub changed_fields: BTreeSet<String>,
}

/// Walks records forward through a node type's schema chain.
///
/// Every step operates on one in-memory working copy; a record is persisted
/// only after the whole chain has been applied, as exactly one appended
/// snapshot. Any failure leaves the log untouched.
#[derive(Clone, Copy)]
pub struct UpgradeEngine<'a> {
    catalog: &'a SchemaCatalog,
    store: &'a VersionedRecordStore,
    transforms: &'a TransformRegistry,
}

impl<'a> UpgradeEngine<'a> {
    pub fn new(
        catalog: &'a SchemaCatalog,
        store: &'a VersionedRecordStore,
        transforms: &'a TransformRegistry,
    ) -> Self {
        Self {
            catalog,
            store,
            transforms,
        }
    }

    /// Apply every strategy in `[from, to)` to `payload`.
    ///
    /// A missing strategy makes its step a no-op. After each step the
    /// payload is re-typed against the reached version when that version is
    /// registered, and the final payload must carry every field the target
    /// version requires.
    pub fn migrate(
        &self,
        node_type: &NodeType,
        mut payload: Payload,
        from: u32,
        to: u32,
    ) -> NodeStoreResult<Migration> {
        if let Some(schema) = self.catalog.get_version(node_type, from) {
            schema.normalize(&mut payload);
        }

        let mut steps = Vec::new();
        let mut changed_fields = BTreeSet::new();
        for version in from..to {
            let mut step = UpgradeStep {
                from: version,
                to: version + 1,
                applied: false,
                changed_fields: BTreeSet::new(),
            };
            match self.catalog.get_strategy(node_type, version) {
                Some(strategy) => {
                    self.apply_strategy(&strategy, &mut payload, &mut step.changed_fields)?;
                    step.applied = true;
                }
                None => debug!("No strategy for {node_type} v{version} -> v{}, skipping", version + 1),
            }
            if let Some(schema) = self.catalog.get_version(node_type, version + 1) {
                schema.normalize(&mut payload);
            }
            changed_fields.extend(step.changed_fields.iter().cloned());
            steps.push(step);
        }

        if let Some(target) = self.catalog.get_version(node_type, to) {
            Validator::new(&target)
                .check_required(&payload)
                .map_err(|violations| NodeStoreError::SchemaChainBroken {
                    node_type: node_type.to_string(),
                    from,
                    to,
                    reason: violations
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                })?;
        }
        set_version_tag(&mut payload, to);

        Ok(Migration {
            payload,
            steps,
            changed_fields,
        })
    }

    fn apply_strategy(
        &self,
        strategy: &UpgradeStrategy,
        payload: &mut Payload,
        changed: &mut BTreeSet<String>,
    ) -> NodeStoreResult<()> {
        for field in &strategy.add_fields {
            if payload.contains_key(&field.name) {
                continue;
            }
            let mut value = field.default_value.clone();
            if let Some(transform) = &field.transform {
                value = self.apply_transform(transform, &field.name, value)?;
            }
            payload.insert(field.name.clone(), value);
            changed.insert(field.name.clone());
        }

        for name in &strategy.remove_fields {
            if payload.remove(name).is_some() {
                changed.insert(name.clone());
            }
        }

        for (old, new) in &strategy.rename_fields {
            if let Some(value) = payload.remove(old) {
                payload.insert(new.clone(), value);
                changed.insert(old.clone());
                changed.insert(new.clone());
            }
        }

        for (name, transform) in &strategy.transform_functions {
            let Some(current) = payload.get(name) else {
                continue;
            };
            let transformed = self.apply_transform(transform, name, current.clone())?;
            if transformed != *current {
                changed.insert(name.clone());
                payload.insert(name.clone(), transformed);
            }
        }
        Ok(())
    }

    fn apply_transform(
        &self,
        transform: &str,
        field: &str,
        value: FieldValue,
    ) -> NodeStoreResult<FieldValue> {
        let Some(function) = self.transforms.get(transform) else {
            warn!("Transform `{transform}` for field `{field}` is not registered, leaving value as is");
            return Ok(value);
        };
        function(&value).map_err(|reason| NodeStoreError::Transform {
            name: transform.to_string(),
            field: field.to_string(),
            reason,
        })
    }

    /// Upgrade one record, returning the typed error on failure.
    pub fn try_upgrade(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        target: Option<u32>,
    ) -> NodeStoreResult<UpgradeResult> {
        let latest = self
            .store
            .read_latest(node_type, id)?
            .ok_or_else(|| NodeStoreError::NodeNotFound {
                node_type: node_type.to_string(),
                id: id.to_string(),
            })?;
        let target = target.unwrap_or_else(|| self.catalog.latest_version_number(node_type));
        let stored = latest.schema_version;

        if stored >= target {
            return Ok(UpgradeResult {
                from_version: stored,
                to_version: stored,
                ..UpgradeResult::new(node_type, id, UpgradeStatus::NotNeeded)
            });
        }

        let migration = self.migrate(node_type, latest.payload, stored, target)?;
        self.store.append(
            node_type,
            id,
            migration.payload,
            target,
            Some(latest.sequence_number),
        )?;
        debug!("Upgraded {node_type}/{id} from v{stored} to v{target}");

        Ok(UpgradeResult {
            from_version: stored,
            to_version: target,
            steps: migration.steps,
            changed_fields: migration.changed_fields,
            ..UpgradeResult::new(node_type, id, UpgradeStatus::Success)
        })
    }

    /// Upgrade one record. Failures are reported in the result, never
    /// raised.
    pub fn upgrade_record(
        &self,
        node_type: &NodeType,
        id: &NodeId,
        target: Option<u32>,
    ) -> UpgradeResult {
        self.try_upgrade(node_type, id, target)
            .unwrap_or_else(|e| UpgradeResult::failed(node_type, id, e))
    }

    /// Upgrade every record of a type on a pool of `concurrency` workers.
    ///
    /// Each id is handled by exactly one worker. Per-record failures are
    /// collected in the returned list; only failing to enumerate the ids or
    /// to start the pool fails the call. Result order is unspecified.
    pub fn upgrade_all(
        &self,
        node_type: &NodeType,
        target: Option<u32>,
        concurrency: usize,
    ) -> NodeStoreResult<Vec<UpgradeResult>> {
        let mut seen = HashSet::new();
        let ids: Vec<NodeId> = self
            .store
            .list_ids(node_type)?
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .build()
            .map_err(|e| NodeStoreError::WorkerPool(e.to_string()))?;

        let results: Vec<UpgradeResult> = pool.install(|| {
            ids.par_iter()
                .map(|id| self.upgrade_record(node_type, id, target))
                .collect()
        });

        for failed in results.iter().filter(|r| r.is_failed()) {
            error!(
                "Upgrade of {node_type}/{} failed: {}",
                failed.node_id,
                failed.error.as_deref().unwrap_or("unknown error")
            );
        }
        let upgraded = results.iter().filter(|r| r.is_success()).count();
        info!(
            "Upgraded {upgraded} of {} {node_type} record(s) on {} worker(s)",
            results.len(),
            concurrency.max(1)
        );
        Ok(results)
    }
}
