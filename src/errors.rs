use std::path::PathBuf;

use thiserror::Error;

pub type NodeStoreResult<T> = Result<T, NodeStoreError>;

#[derive(Error, Debug)]
pub enum NodeStoreError {
    #[error("Node not found: {node_type}/{id}")]
    NodeNotFound { node_type: String, id: String },

    #[error("Schema version {version} not registered for node type {node_type}")]
    SchemaVersionNotFound { node_type: String, version: u32 },

    #[error("Node already exists: {node_type}/{id}")]
    AlreadyExists { node_type: String, id: String },

    #[error("Validation failed for {node_type}: {}", join_violations(.violations))]
    ValidationFailed {
        node_type: String,
        violations: Vec<FieldViolation>,
    },

    #[error("Schema chain broken for {node_type} (v{from} -> v{to}): {reason}")]
    SchemaChainBroken {
        node_type: String,
        from: u32,
        to: u32,
        reason: String,
    },

    #[error("Downgrade rejected for {node_type}/{id}: stored v{stored}, requested v{requested}")]
    DowngradeRejected {
        node_type: String,
        id: String,
        stored: u32,
        requested: u32,
    },

    #[error("Concurrent modification of {node_type}/{id}: expected sequence {expected}, found {found}")]
    ConcurrentModification {
        node_type: String,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Storage unavailable ({context}): {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record {node_type}/{id}: {reason}")]
    CorruptRecord {
        node_type: String,
        id: String,
        reason: String,
    },

    #[error("Counter for {node_type} is corrupt: {reason}")]
    CounterCorrupt { node_type: String, reason: String },

    #[error("Counter for {node_type} could not be committed: {reason}")]
    CounterWriteFailed { node_type: String, reason: String },

    #[error("Invalid node type `{0}`")]
    InvalidNodeType(String),

    #[error("Invalid node id `{0}`")]
    InvalidNodeId(String),

    #[error("Invalid schema document {}: {reason}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_default())]
    InvalidSchema {
        path: Option<PathBuf>,
        reason: String,
    },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Transform `{name}` failed on field `{field}`: {reason}")]
    Transform {
        name: String,
        field: String,
        reason: String,
    },

    #[cfg(feature = "sled")]
    #[error("There was an error with the Sled database")]
    Backend(#[from] sled::Error),

    #[error("There was a conversion Error")]
    Encoding(#[from] EncodingDecodingError),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Backend `{0}` is not available in this build")]
    UnsupportedBackend(String),
}

impl NodeStoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NodeStoreError::StorageUnavailable {
            context: context.into(),
            source,
        }
    }

    /// True for the variants that mean "the thing asked for is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NodeStoreError::NodeNotFound { .. } | NodeStoreError::SchemaVersionNotFound { .. }
        )
    }

    /// Violations carried by a `ValidationFailed` error, empty otherwise.
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            NodeStoreError::ValidationFailed { violations, .. } => violations,
            _ => &[],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodingDecodingError {
    #[error("There was an error encoding type")]
    Encoding(#[from] bincode::error::EncodeError),
    #[error("There was an error decoding type")]
    Decoding(#[from] bincode::error::DecodeError),
    #[error("There was an error handling JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single failed check against a field definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: {reason}")]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert {value} from {from} to {to}")]
pub struct ConversionError {
    pub from: String,
    pub to: String,
    pub value: String,
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
