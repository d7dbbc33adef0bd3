//! [sled](https://docs.rs/sled) backend.
//!
//! Each snapshot is its own key, `node_type \0 id \0 sequence_be`, in the
//! `snapshots` tree, so a log is a prefix scan in sequence order and a slot
//! is claimed with a single compare-and-swap from "absent". Counters live in
//! the `counters` tree and are advanced with a compare-and-swap loop.

use std::path::Path;

use bincode::{Decode, Encode};

use crate::databases::{RecordBackend, SlotWrite};
use crate::errors::{EncodingDecodingError, NodeStoreError, NodeStoreResult};
use crate::keys::{NodeId, NodeType, RecordKey};
use crate::record::RecordSnapshot;

const SNAPSHOT_TREE: &str = "snapshots";
const COUNTER_TREE: &str = "counters";
const SEPARATOR: u8 = 0;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct CounterState {
    current: u64,
}

/// Snapshot logs and counters in a sled database.
pub struct SledStore {
    db: sled::Db,
    snapshots: sled::Tree,
    counters: sled::Tree,
}

impl SledStore {
    /// Open a new SledStore at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> NodeStoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Create an in-memory SledStore (useful for testing)
    pub fn temp() -> NodeStoreResult<Self> {
        let config = sled::Config::new().temporary(true);
        Self::from_db(config.open()?)
    }

    fn from_db(db: sled::Db) -> NodeStoreResult<Self> {
        Ok(Self {
            snapshots: db.open_tree(SNAPSHOT_TREE)?,
            counters: db.open_tree(COUNTER_TREE)?,
            db,
        })
    }

    /// Get direct access to the underlying sled database
    pub fn db(&self) -> &sled::Db {
        &self.db
    }
}

fn log_prefix(key: &RecordKey) -> Vec<u8> {
    let mut prefix = type_prefix(&key.node_type);
    prefix.extend_from_slice(key.id.as_str().as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

fn type_prefix(node_type: &NodeType) -> Vec<u8> {
    let mut prefix = node_type.as_str().as_bytes().to_vec();
    prefix.push(SEPARATOR);
    prefix
}

fn slot_key(key: &RecordKey, sequence_number: u64) -> Vec<u8> {
    let mut slot = log_prefix(key);
    slot.extend_from_slice(&sequence_number.to_be_bytes());
    slot
}

/// Split `type \0 id \0 seq` into its parts.
fn split_slot(raw: &[u8]) -> Option<(&str, &str, u64)> {
    let (head, seq) = raw.split_at_checked(raw.len().checked_sub(8)?)?;
    let head = head.strip_suffix(&[SEPARATOR])?;
    let split = head.iter().position(|b| *b == SEPARATOR)?;
    let node_type = std::str::from_utf8(&head[..split]).ok()?;
    let id = std::str::from_utf8(&head[split + 1..]).ok()?;
    Some((node_type, id, u64::from_be_bytes(seq.try_into().ok()?)))
}

fn encode<T: serde::Serialize>(value: &T) -> NodeStoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EncodingDecodingError::from(e).into())
}

fn decode_snapshot(key: &RecordKey, bytes: &[u8]) -> NodeStoreResult<RecordSnapshot> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(snapshot, _)| snapshot)
        .map_err(|e| NodeStoreError::CorruptRecord {
            node_type: key.node_type.to_string(),
            id: key.id.to_string(),
            reason: e.to_string(),
        })
}

impl RecordBackend for SledStore {
    fn read_log(&self, key: &RecordKey) -> NodeStoreResult<Vec<RecordSnapshot>> {
        let mut log = Vec::new();
        for entry in self.snapshots.scan_prefix(log_prefix(key)) {
            let (_, value) = entry?;
            log.push(decode_snapshot(key, &value)?);
        }
        Ok(log)
    }

    fn read_latest(&self, key: &RecordKey) -> NodeStoreResult<Option<RecordSnapshot>> {
        match self.snapshots.scan_prefix(log_prefix(key)).next_back() {
            Some(entry) => Ok(Some(decode_snapshot(key, &entry?.1)?)),
            None => Ok(None),
        }
    }

    fn write_snapshot(
        &self,
        key: &RecordKey,
        snapshot: &RecordSnapshot,
    ) -> NodeStoreResult<SlotWrite> {
        let sequence = snapshot.sequence_number;
        if sequence > 1 && self.snapshots.get(slot_key(key, sequence - 1))?.is_none() {
            let found = self.read_log(key)?.len() as u64;
            return Err(NodeStoreError::ConcurrentModification {
                node_type: key.node_type.to_string(),
                id: key.id.to_string(),
                expected: sequence - 1,
                found,
            });
        }
        let bytes = encode(snapshot)?;
        let claimed = self
            .snapshots
            .compare_and_swap(slot_key(key, sequence), None as Option<&[u8]>, Some(bytes))?;
        match claimed {
            Ok(()) => {
                self.snapshots.flush()?;
                Ok(SlotWrite::Written)
            }
            Err(_) => Ok(SlotWrite::Occupied),
        }
    }

    fn list_ids(&self, node_type: &NodeType) -> NodeStoreResult<Vec<NodeId>> {
        let mut ids = Vec::new();
        for entry in self.snapshots.scan_prefix(type_prefix(node_type)) {
            let (raw, _) = entry?;
            if let Some((stored_type, id, 1)) = split_slot(&raw)
                && stored_type == node_type.as_str()
            {
                ids.push(NodeId::from(id));
            }
        }
        Ok(ids)
    }

    fn list_node_types(&self) -> NodeStoreResult<Vec<NodeType>> {
        let mut types: Vec<NodeType> = Vec::new();
        for entry in self.snapshots.iter() {
            let (raw, _) = entry?;
            let Some((stored_type, _, 1)) = split_slot(&raw) else {
                continue;
            };
            if types.last().is_none_or(|last| last.as_str() != stored_type)
                && let Ok(node_type) = NodeType::new(stored_type)
            {
                types.push(node_type);
            }
        }
        types.dedup();
        Ok(types)
    }

    fn increment_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        let write_failed = |reason: String| NodeStoreError::CounterWriteFailed {
            node_type: node_type.to_string(),
            reason,
        };
        let name = node_type.as_str().as_bytes();
        loop {
            let previous = self.counters.get(name)?;
            let current = match &previous {
                Some(bytes) => decode_counter(node_type, bytes)?.current,
                None => 0,
            };
            let next = CounterState { current: current + 1 };
            let bytes = bincode::encode_to_vec(next, bincode::config::standard())
                .map_err(|e| write_failed(e.to_string()))?;
            let swapped = self
                .counters
                .compare_and_swap(name, previous, Some(bytes))
                .map_err(|e| write_failed(e.to_string()))?;
            if swapped.is_ok() {
                self.counters
                    .flush()
                    .map_err(|e| write_failed(e.to_string()))?;
                return Ok(next.current);
            }
        }
    }

    fn current_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        match self.counters.get(node_type.as_str().as_bytes())? {
            Some(bytes) => Ok(decode_counter(node_type, &bytes)?.current),
            None => Ok(0),
        }
    }

    fn flush(&self) -> NodeStoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_counter(node_type: &NodeType, bytes: &[u8]) -> NodeStoreResult<CounterState> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(state, _)| state)
        .map_err(|e| NodeStoreError::CounterCorrupt {
            node_type: node_type.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload;
    use chrono::Utc;

    fn snapshot(sequence_number: u64) -> RecordSnapshot {
        let now = Utc::now();
        RecordSnapshot {
            payload: payload! { "name" => "Widget" },
            schema_version: 1,
            created_at: now,
            updated_at: now,
            sequence_number,
            owner_id: None,
        }
    }

    #[test]
    fn test_sled_slots_and_listing() {
        let store = SledStore::temp().unwrap();
        let product = NodeType::new("product").unwrap();
        let products = NodeType::new("products").unwrap();
        let key = RecordKey::new(&product, &NodeId::from("1")).unwrap();
        let other = RecordKey::new(&products, &NodeId::from("1")).unwrap();

        assert_eq!(store.write_snapshot(&key, &snapshot(1)).unwrap(), SlotWrite::Written);
        assert_eq!(store.write_snapshot(&key, &snapshot(1)).unwrap(), SlotWrite::Occupied);
        assert_eq!(store.write_snapshot(&key, &snapshot(2)).unwrap(), SlotWrite::Written);
        assert!(store.write_snapshot(&key, &snapshot(5)).is_err());
        store.write_snapshot(&other, &snapshot(1)).unwrap();

        assert_eq!(store.read_log(&key).unwrap().len(), 2);
        assert_eq!(store.read_latest(&key).unwrap().unwrap().sequence_number, 2);
        assert_eq!(store.list_ids(&product).unwrap(), vec![NodeId::from("1")]);
        assert_eq!(store.list_node_types().unwrap(), vec![product, products]);
    }

    #[test]
    fn test_sled_counter() {
        let store = SledStore::temp().unwrap();
        let product = NodeType::new("product").unwrap();
        assert_eq!(store.current_counter(&product).unwrap(), 0);
        assert_eq!(store.increment_counter(&product).unwrap(), 1);
        assert_eq!(store.increment_counter(&product).unwrap(), 2);
        assert_eq!(store.current_counter(&product).unwrap(), 2);
    }
}
