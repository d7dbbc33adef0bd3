use crate::errors::NodeStoreResult;
use crate::keys::{NodeId, NodeType, RecordKey};
use crate::record::RecordSnapshot;

/// Outcome of writing a snapshot into its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWrite {
    /// The snapshot is durable.
    Written,
    /// Another snapshot already holds this sequence number; nothing was
    /// written.
    Occupied,
}

/// Physical storage of snapshot logs and per-type counters.
///
/// Implementations must never modify or remove a snapshot once written.
/// `write_snapshot` puts the snapshot at slot `snapshot.sequence_number`
/// and only succeeds if that is the next free slot of the log, so
/// concurrent writers racing for the same slot cannot both win.
pub trait RecordBackend: Send + Sync {
    /// The full log in sequence order, empty if the node does not exist.
    fn read_log(&self, key: &RecordKey) -> NodeStoreResult<Vec<RecordSnapshot>>;

    /// The last snapshot of the log.
    fn read_latest(&self, key: &RecordKey) -> NodeStoreResult<Option<RecordSnapshot>> {
        Ok(self.read_log(key)?.pop())
    }

    fn write_snapshot(&self, key: &RecordKey, snapshot: &RecordSnapshot)
    -> NodeStoreResult<SlotWrite>;

    /// Ids with at least one snapshot. Order is unspecified.
    fn list_ids(&self, node_type: &NodeType) -> NodeStoreResult<Vec<NodeId>>;

    /// Node types with at least one stored node.
    fn list_node_types(&self) -> NodeStoreResult<Vec<NodeType>>;

    /// Durably advance the type's counter and return the new value.
    fn increment_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64>;

    /// The last value handed out, 0 if none.
    fn current_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64>;

    fn flush(&self) -> NodeStoreResult<()> {
        Ok(())
    }
}
