//! Node type and node id keys.
//!
//! Both end up as path components in the file backend, so construction
//! rejects anything that could escape the data directory.

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::errors::{NodeStoreError, NodeStoreResult};

/// A named category of records sharing one schema evolution chain, e.g.
/// `finance/sales_order_header`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeType(String);

impl NodeType {
    pub fn new(name: impl Into<String>) -> NodeStoreResult<Self> {
        let name = name.into();
        let valid = !name.is_empty() && name.split('/').all(valid_segment);
        if valid {
            Ok(Self(name))
        } else {
            Err(NodeStoreError::InvalidNodeType(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, e.g. `["finance", "sales_order_header"]`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment of the type name.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl AsRef<str> for NodeType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeType {
    type Err = NodeStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeType {
    type Error = NodeStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.0
    }
}

/// Identifier of one node within its node type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject ids that cannot be used as a file name.
    pub fn validate(&self) -> NodeStoreResult<()> {
        if valid_segment(&self.0) {
            Ok(())
        } else {
            Err(NodeStoreError::InvalidNodeId(self.0.clone()))
        }
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId(value.to_string())
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value.to_string())
    }
}

/// Full address of one node's snapshot log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub node_type: NodeType,
    pub id: NodeId,
}

impl RecordKey {
    pub fn new(node_type: &NodeType, id: &NodeId) -> NodeStoreResult<Self> {
        id.validate()?;
        Ok(Self {
            node_type: node_type.clone(),
            id: id.clone(),
        })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_type, self.id)
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
