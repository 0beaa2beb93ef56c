//! In-memory graph storage.
//!
//! Nodes and relationships are kept in ordered maps keyed by id so that
//! iteration, snapshots, and digests are deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use replicant_core::{
    Direction, EntityId, NodeId, PropertyValue, RelationshipId, REFERENCE_NODE,
};

use crate::error::{Result, StoreError};

/// Property access shared by nodes and relationships.
pub trait PropertyContainer {
    fn properties(&self) -> &BTreeMap<String, PropertyValue>;

    fn properties_mut(&mut self) -> &mut BTreeMap<String, PropertyValue>;

    fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties().get(key)
    }

    /// Property keys in no particular contractual order.
    fn property_keys(&self) -> Vec<&str> {
        self.properties().keys().map(String::as_str).collect()
    }

    fn set_property(&mut self, key: &str, value: PropertyValue) -> Option<PropertyValue> {
        self.properties_mut().insert(key.to_string(), value)
    }

    fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties_mut().remove(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Incident relationships, both directions. Rebuilt on load.
    #[serde(skip)]
    pub relationships: BTreeSet<RelationshipId>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
            relationships: BTreeSet::new(),
        }
    }
}

impl PropertyContainer for Node {
    fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut BTreeMap<String, PropertyValue> {
        &mut self.properties
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: RelationshipId,
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Relationship {
    /// The node at the other end from `node`.
    pub fn other_node(&self, node: NodeId) -> NodeId {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }
}

impl PropertyContainer for Relationship {
    fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut BTreeMap<String, PropertyValue> {
        &mut self.properties
    }
}

/// CRUD capability of a member's local graph.
///
/// Ids are always supplied by the caller: only the master allocates them.
pub trait GraphStore {
    fn create_node_with_id(&mut self, id: NodeId) -> Result<()>;

    fn create_relationship_with_id(
        &mut self,
        id: RelationshipId,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<()>;

    fn node(&self, id: NodeId) -> Result<&Node>;

    fn relationship(&self, id: RelationshipId) -> Result<&Relationship>;

    fn has_node(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    fn has_relationship(&self, id: RelationshipId) -> bool {
        self.relationship(id).is_ok()
    }

    fn get_property(&self, entity: EntityId, key: &str) -> Result<Option<&PropertyValue>> {
        Ok(match entity {
            EntityId::Node(id) => self.node(id)?.property(key),
            EntityId::Relationship(id) => self.relationship(id)?.property(key),
        })
    }

    fn set_property(
        &mut self,
        entity: EntityId,
        key: &str,
        value: PropertyValue,
    ) -> Result<Option<PropertyValue>>;

    fn remove_property(&mut self, entity: EntityId, key: &str) -> Result<Option<PropertyValue>>;

    /// Deletes a node. Fails while relationships are still attached.
    fn delete_node(&mut self, id: NodeId) -> Result<()>;

    fn delete_relationship(&mut self, id: RelationshipId) -> Result<()>;

    fn node_ids(&self) -> Vec<NodeId>;

    fn relationship_ids(&self) -> Vec<RelationshipId>;

    fn relationships_of(&self, node: NodeId, direction: Direction) -> Result<Vec<RelationshipId>>;

    fn highest_node_id(&self) -> Option<NodeId> {
        self.node_ids().into_iter().max()
    }

    fn highest_relationship_id(&self) -> Option<RelationshipId> {
        self.relationship_ids().into_iter().max()
    }
}

/// The in-memory [`GraphStore`] used by every member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphImage", into = "GraphImage")]
pub struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelationshipId, Relationship>,
}

impl MemoryGraph {
    /// An empty graph holding only the reference node.
    pub fn new() -> Self {
        let mut graph = Self::default();
        graph
            .nodes
            .insert(REFERENCE_NODE, Node::new(REFERENCE_NODE));
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn relationship_mut(&mut self, id: RelationshipId) -> Result<&mut Relationship> {
        self.relationships
            .get_mut(&id)
            .ok_or(StoreError::RelationshipNotFound(id))
    }
}

impl GraphStore for MemoryGraph {
    fn create_node_with_id(&mut self, id: NodeId) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(StoreError::DuplicateNode(id));
        }
        self.nodes.insert(id, Node::new(id));
        Ok(())
    }

    fn create_relationship_with_id(
        &mut self,
        id: RelationshipId,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<()> {
        if self.relationships.contains_key(&id) {
            return Err(StoreError::DuplicateRelationship(id));
        }
        // Check both endpoints before touching either.
        self.node(start)?;
        self.node(end)?;
        self.node_mut(start)?.relationships.insert(id);
        self.node_mut(end)?.relationships.insert(id);
        self.relationships.insert(
            id,
            Relationship {
                id,
                rel_type: rel_type.to_string(),
                start,
                end,
                properties: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn relationship(&self, id: RelationshipId) -> Result<&Relationship> {
        self.relationships
            .get(&id)
            .ok_or(StoreError::RelationshipNotFound(id))
    }

    fn set_property(
        &mut self,
        entity: EntityId,
        key: &str,
        value: PropertyValue,
    ) -> Result<Option<PropertyValue>> {
        Ok(match entity {
            EntityId::Node(id) => self.node_mut(id)?.set_property(key, value),
            EntityId::Relationship(id) => self.relationship_mut(id)?.set_property(key, value),
        })
    }

    fn remove_property(&mut self, entity: EntityId, key: &str) -> Result<Option<PropertyValue>> {
        Ok(match entity {
            EntityId::Node(id) => PropertyContainer::remove_property(self.node_mut(id)?, key),
            EntityId::Relationship(id) => {
                PropertyContainer::remove_property(self.relationship_mut(id)?, key)
            }
        })
    }

    fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let count = self.node(id)?.relationships.len();
        if count > 0 {
            return Err(StoreError::NodeHasRelationships { node: id, count });
        }
        self.nodes.remove(&id);
        Ok(())
    }

    fn delete_relationship(&mut self, id: RelationshipId) -> Result<()> {
        let rel = self
            .relationships
            .remove(&id)
            .ok_or(StoreError::RelationshipNotFound(id))?;
        for node in [rel.start, rel.end] {
            if let Some(n) = self.nodes.get_mut(&node) {
                n.relationships.remove(&id);
            }
        }
        Ok(())
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    fn relationship_ids(&self) -> Vec<RelationshipId> {
        self.relationships.keys().copied().collect()
    }

    fn relationships_of(&self, node: NodeId, direction: Direction) -> Result<Vec<RelationshipId>> {
        let n = self.node(node)?;
        Ok(n.relationships
            .iter()
            .copied()
            .filter(|rel_id| match self.relationships.get(rel_id) {
                Some(rel) => match direction {
                    Direction::Outgoing => rel.start == node,
                    Direction::Incoming => rel.end == node,
                    Direction::Both => true,
                },
                None => false,
            })
            .collect())
    }

    fn highest_node_id(&self) -> Option<NodeId> {
        self.nodes.keys().next_back().copied()
    }

    fn highest_relationship_id(&self) -> Option<RelationshipId> {
        self.relationships.keys().next_back().copied()
    }
}

/// Serialized form of a [`MemoryGraph`]: flat lists, with incidence sets
/// rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GraphImage {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

impl From<GraphImage> for MemoryGraph {
    fn from(image: GraphImage) -> Self {
        let mut nodes: BTreeMap<NodeId, Node> = image
            .nodes
            .into_iter()
            .map(|mut n| {
                n.relationships.clear();
                (n.id, n)
            })
            .collect();
        let mut relationships = BTreeMap::new();
        for rel in image.relationships {
            for endpoint in [rel.start, rel.end] {
                if let Some(n) = nodes.get_mut(&endpoint) {
                    n.relationships.insert(rel.id);
                }
            }
            relationships.insert(rel.id, rel);
        }
        Self {
            nodes,
            relationships,
        }
    }
}

impl From<MemoryGraph> for GraphImage {
    fn from(graph: MemoryGraph) -> Self {
        Self {
            nodes: graph.nodes.into_values().collect(),
            relationships: graph.relationships.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_linked_nodes() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        g.create_node_with_id(NodeId(1)).unwrap();
        g.create_relationship_with_id(RelationshipId(1), REFERENCE_NODE, NodeId(1), "HA_TEST")
            .unwrap();
        g
    }

    #[test]
    fn fresh_graph_has_reference_node() {
        let g = MemoryGraph::new();
        assert_eq!(g.node_ids(), vec![REFERENCE_NODE]);
        assert_eq!(g.relationship_count(), 0);
    }

    #[test]
    fn relationships_by_direction() {
        let g = two_linked_nodes();
        assert_eq!(
            g.relationships_of(REFERENCE_NODE, Direction::Outgoing).unwrap(),
            vec![RelationshipId(1)]
        );
        assert!(g
            .relationships_of(REFERENCE_NODE, Direction::Incoming)
            .unwrap()
            .is_empty());
        assert_eq!(
            g.relationships_of(NodeId(1), Direction::Both).unwrap(),
            vec![RelationshipId(1)]
        );
    }

    #[test]
    fn delete_node_requires_no_relationships() {
        let mut g = two_linked_nodes();
        let err = g.delete_node(NodeId(1)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::NodeHasRelationships { count: 1, .. }
        ));

        g.delete_relationship(RelationshipId(1)).unwrap();
        g.delete_node(NodeId(1)).unwrap();
        assert!(!g.has_node(NodeId(1)));
        assert!(g.node(REFERENCE_NODE).unwrap().relationships.is_empty());
    }

    #[test]
    fn relationship_to_missing_node_leaves_graph_untouched() {
        let mut g = MemoryGraph::new();
        let err = g
            .create_relationship_with_id(RelationshipId(1), REFERENCE_NODE, NodeId(9), "X")
            .unwrap_err();
        assert!(matches!(err, StoreError::NodeNotFound(NodeId(9))));
        assert!(g.node(REFERENCE_NODE).unwrap().relationships.is_empty());
    }

    #[test]
    fn properties_on_both_entity_kinds() {
        let mut g = two_linked_nodes();
        g.set_property(NodeId(1).into(), "name", "Mattias".into())
            .unwrap();
        g.set_property(RelationshipId(1).into(), "weight", 4i64.into())
            .unwrap();

        assert_eq!(
            g.get_property(NodeId(1).into(), "name").unwrap(),
            Some(&PropertyValue::from("Mattias"))
        );
        let removed = g
            .remove_property(RelationshipId(1).into(), "weight")
            .unwrap();
        assert_eq!(removed, Some(PropertyValue::Int(4)));
        assert!(g
            .relationship(RelationshipId(1))
            .unwrap()
            .property_keys()
            .is_empty());
    }

    #[test]
    fn serialization_rebuilds_incidence() {
        let g = two_linked_nodes();
        let json = serde_json::to_string(&g).unwrap();
        let back: MemoryGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
        assert!(back
            .node(NodeId(1))
            .unwrap()
            .relationships
            .contains(&RelationshipId(1)));
    }
}
