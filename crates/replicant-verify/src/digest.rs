//! Canonical content digest of a graph.
//!
//! Two stores with the same nodes, relationships, and property values have
//! the same digest regardless of how they got there.

use std::collections::BTreeMap;

use serde::Serialize;

use replicant_core::{NodeId, PropertyValue, RelationshipId};
use replicant_store::GraphStore;

use crate::error::Result;

#[derive(Serialize)]
struct CanonicalNode<'a> {
    id: NodeId,
    properties: &'a BTreeMap<String, PropertyValue>,
}

#[derive(Serialize)]
struct CanonicalRelationship<'a> {
    id: RelationshipId,
    rel_type: &'a str,
    start: NodeId,
    end: NodeId,
    properties: &'a BTreeMap<String, PropertyValue>,
}

/// BLAKE3 (hex) over every node, then every relationship, in id order.
pub fn graph_digest(graph: &dyn GraphStore) -> Result<String> {
    let mut hasher = blake3::Hasher::new();

    let mut node_ids = graph.node_ids();
    node_ids.sort();
    for id in node_ids {
        let node = graph.node(id)?;
        hasher.update(b"N");
        hasher.update(&serde_json::to_vec(&CanonicalNode {
            id,
            properties: &node.properties,
        })?);
    }

    let mut rel_ids = graph.relationship_ids();
    rel_ids.sort();
    for id in rel_ids {
        let rel = graph.relationship(id)?;
        hasher.update(b"R");
        hasher.update(&serde_json::to_vec(&CanonicalRelationship {
            id,
            rel_type: &rel.rel_type,
            start: rel.start,
            end: rel.end,
            properties: &rel.properties,
        })?);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_core::REFERENCE_NODE;
    use replicant_store::MemoryGraph;

    #[test]
    fn same_content_same_digest() {
        let mut a = MemoryGraph::new();
        a.create_node_with_id(NodeId(2)).unwrap();
        a.create_node_with_id(NodeId(1)).unwrap();

        let mut b = MemoryGraph::new();
        b.create_node_with_id(NodeId(1)).unwrap();
        b.create_node_with_id(NodeId(2)).unwrap();

        assert_eq!(graph_digest(&a).unwrap(), graph_digest(&b).unwrap());
    }

    #[test]
    fn property_change_changes_digest() {
        let a = MemoryGraph::new();
        let mut b = MemoryGraph::new();
        b.set_property(REFERENCE_NODE.into(), "k", 1i64.into())
            .unwrap();
        assert_ne!(graph_digest(&a).unwrap(), graph_digest(&b).unwrap());
    }
}
