//! Error types for the replicant-store crate.

use replicant_core::{NodeId, RelationshipId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    #[error("Node {node} still has {count} relationship(s)")]
    NodeHasRelationships { node: NodeId, count: usize },

    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("Relationship {0} already exists")]
    DuplicateRelationship(RelationshipId),

    #[error("Snapshot not found in {0}")]
    SnapshotMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
