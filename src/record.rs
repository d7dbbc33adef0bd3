use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{FieldValue, Payload};

/// Payload field mirroring the snapshot's schema version.
pub const SCHEMA_VERSION_FIELD: &str = "_schema_version";

/// One immutable physical write of a node.
///
/// A node's log is the ordered list of its snapshots; the last one is the
/// current state. `sequence_number` is 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub payload: Payload,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sequence_number: u64,
    pub owner_id: Option<String>,
}

impl RecordSnapshot {
    /// The payload without bookkeeping fields (leading `_`).
    pub fn data(&self) -> Payload {
        self.payload
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Schema version recorded inside a payload, if any.
pub fn version_tag(payload: &Payload) -> Option<u32> {
    payload
        .get(SCHEMA_VERSION_FIELD)
        .and_then(|v| match v {
            FieldValue::String(s) => s.trim().parse().ok(),
            other => other.as_i64(),
        })
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

pub fn set_version_tag(payload: &mut Payload, version: u32) {
    payload.insert(SCHEMA_VERSION_FIELD.into(), FieldValue::from(version));
}
