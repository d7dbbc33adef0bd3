use std::sync::Arc;

use log::debug;

use crate::databases::RecordBackend;
use crate::errors::NodeStoreResult;
use crate::keys::NodeType;

/// Durable, per-node-type monotonic id source.
///
/// The backend commits the new counter value before it is returned, so a
/// failed call never consumes an id and a restart never repeats one.
#[derive(Clone)]
pub struct IdAllocator {
    backend: Arc<dyn RecordBackend>,
}

impl IdAllocator {
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        Self { backend }
    }

    /// Allocate the next id, strictly greater than every id handed out
    /// before for this node type.
    pub fn next_id(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        let id = self.backend.increment_counter(node_type)?;
        debug!("Allocated id {id} for {node_type}");
        Ok(id)
    }

    /// The last id handed out, 0 if none.
    pub fn current(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        self.backend.current_counter(node_type)
    }
}
