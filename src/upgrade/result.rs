use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};

use crate::keys::{NodeId, NodeType};

/// Outcome of upgrading one record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStatus {
    /// Upgraded and one snapshot appended.
    Success,
    /// Nothing written.
    Failed,
    /// Already at or beyond the target version.
    NotNeeded,
}

/// One version edge walked during an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeStep {
    pub from: u32,
    pub to: u32,
    /// False when no strategy was registered for the edge.
    pub applied: bool,
    pub changed_fields: BTreeSet<String>,
}

/// Report for a single-record upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeResult {
    pub node_type: NodeType,
    pub node_id: NodeId,
    pub status: UpgradeStatus,
    pub from_version: u32,
    pub to_version: u32,
    pub steps: Vec<UpgradeStep>,
    /// Union of the fields touched by every step.
    pub changed_fields: BTreeSet<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UpgradeResult {
    pub(crate) fn new(node_type: &NodeType, node_id: &NodeId, status: UpgradeStatus) -> Self {
        Self {
            node_type: node_type.clone(),
            node_id: node_id.clone(),
            status,
            from_version: 0,
            to_version: 0,
            steps: Vec::new(),
            changed_fields: BTreeSet::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn failed(node_type: &NodeType, node_id: &NodeId, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(node_type, node_id, UpgradeStatus::Failed)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UpgradeStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == UpgradeStatus::Failed
    }
}

/// Failure of one record within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpgradeError {
    pub node_id: NodeId,
    pub error: String,
}

/// Counts over the results of `upgrade_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUpgradeSummary {
    /// Number of records upgraded.
    pub succeeded: usize,
    /// Number of records already current.
    pub not_needed: usize,
    /// Number of records that failed.
    pub failed: usize,
    /// Detailed errors if any.
    pub errors: Vec<BatchUpgradeError>,
}

impl BatchUpgradeSummary {
    pub fn from_results(results: &[UpgradeResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                UpgradeStatus::Success => summary.succeeded += 1,
                UpgradeStatus::NotNeeded => summary.not_needed += 1,
                UpgradeStatus::Failed => {
                    summary.failed += 1;
                    summary.errors.push(BatchUpgradeError {
                        node_id: result.node_id.clone(),
                        error: result.error.clone().unwrap_or_default(),
                    });
                }
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.not_needed + self.failed
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0
    }
}
