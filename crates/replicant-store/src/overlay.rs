//! Transaction-local view over a store.
//!
//! An [`Overlay`] records the effect of a sequence of mutations without
//! touching the underlying store. Reads through the overlay see the store
//! as it would be after those mutations. Recording a mutation validates it
//! against that combined view, which is how change sets are checked before
//! they are applied.

use std::collections::{BTreeMap, BTreeSet};

use replicant_core::{
    ChangeSet, Direction, EntityId, Mutation, NodeId, PropertyValue, RelationshipId,
};

use crate::error::{Result, StoreError};
use crate::graph::GraphStore;

#[derive(Debug, Clone, PartialEq)]
struct RelationshipHeader {
    rel_type: String,
    start: NodeId,
    end: NodeId,
}

/// Pending, not yet applied, changes of one transaction.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    created_nodes: BTreeSet<NodeId>,
    deleted_nodes: BTreeSet<NodeId>,
    created_relationships: BTreeMap<RelationshipId, RelationshipHeader>,
    deleted_relationships: BTreeSet<RelationshipId>,
    /// `None` marks a removed property.
    properties: BTreeMap<(EntityId, String), Option<PropertyValue>>,
    changes: ChangeSet,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutations recorded so far, in order.
    pub fn change_set(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn into_change_set(self) -> ChangeSet {
        self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn node_exists(&self, base: &dyn GraphStore, id: NodeId) -> bool {
        if self.deleted_nodes.contains(&id) {
            return false;
        }
        self.created_nodes.contains(&id) || base.has_node(id)
    }

    pub fn relationship_exists(&self, base: &dyn GraphStore, id: RelationshipId) -> bool {
        if self.deleted_relationships.contains(&id) {
            return false;
        }
        self.created_relationships.contains_key(&id) || base.has_relationship(id)
    }

    fn entity_exists(&self, base: &dyn GraphStore, entity: EntityId) -> bool {
        match entity {
            EntityId::Node(id) => self.node_exists(base, id),
            EntityId::Relationship(id) => self.relationship_exists(base, id),
        }
    }

    fn require(&self, base: &dyn GraphStore, entity: EntityId) -> Result<()> {
        if self.entity_exists(base, entity) {
            return Ok(());
        }
        Err(match entity {
            EntityId::Node(id) => StoreError::NodeNotFound(id),
            EntityId::Relationship(id) => StoreError::RelationshipNotFound(id),
        })
    }

    /// Start and end node of a visible relationship.
    pub fn endpoints(
        &self,
        base: &dyn GraphStore,
        id: RelationshipId,
    ) -> Result<(NodeId, NodeId)> {
        self.require(base, id.into())?;
        if let Some(header) = self.created_relationships.get(&id) {
            return Ok((header.start, header.end));
        }
        let rel = base.relationship(id)?;
        Ok((rel.start, rel.end))
    }

    pub fn relationship_type(&self, base: &dyn GraphStore, id: RelationshipId) -> Result<String> {
        self.require(base, id.into())?;
        if let Some(header) = self.created_relationships.get(&id) {
            return Ok(header.rel_type.clone());
        }
        Ok(base.relationship(id)?.rel_type.clone())
    }

    pub fn property(
        &self,
        base: &dyn GraphStore,
        entity: EntityId,
        key: &str,
    ) -> Result<Option<PropertyValue>> {
        self.require(base, entity)?;
        if let Some(pending) = self.properties.get(&(entity, key.to_string())) {
            return Ok(pending.clone());
        }
        if self.is_created(entity) {
            return Ok(None);
        }
        Ok(base.get_property(entity, key)?.cloned())
    }

    pub fn property_keys(&self, base: &dyn GraphStore, entity: EntityId) -> Result<Vec<String>> {
        self.require(base, entity)?;
        let mut keys: BTreeSet<String> = BTreeSet::new();
        if !self.is_created(entity) {
            let stored: BTreeSet<String> = match entity {
                EntityId::Node(id) => base.node(id)?.properties.keys().cloned().collect(),
                EntityId::Relationship(id) => {
                    base.relationship(id)?.properties.keys().cloned().collect()
                }
            };
            keys = stored;
        }
        for ((owner, key), value) in &self.properties {
            if *owner != entity {
                continue;
            }
            match value {
                Some(_) => keys.insert(key.clone()),
                None => keys.remove(key),
            };
        }
        Ok(keys.into_iter().collect())
    }

    /// Visible relationships of a node, in id order.
    pub fn relationships_of(
        &self,
        base: &dyn GraphStore,
        node: NodeId,
        direction: Direction,
    ) -> Result<Vec<RelationshipId>> {
        self.require(base, node.into())?;
        let mut rels: BTreeSet<RelationshipId> = if self.created_nodes.contains(&node) {
            BTreeSet::new()
        } else {
            base.relationships_of(node, direction)?.into_iter().collect()
        };
        for (id, header) in &self.created_relationships {
            let matches = match direction {
                Direction::Outgoing => header.start == node,
                Direction::Incoming => header.end == node,
                Direction::Both => header.start == node || header.end == node,
            };
            if matches {
                rels.insert(*id);
            }
        }
        rels.retain(|id| !self.deleted_relationships.contains(id));
        Ok(rels.into_iter().collect())
    }

    fn is_created(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Node(id) => self.created_nodes.contains(&id),
            EntityId::Relationship(id) => self.created_relationships.contains_key(&id),
        }
    }

    /// Validate `mutation` against the current view and record it.
    ///
    /// A rejected mutation leaves the overlay unchanged.
    pub fn record(&mut self, base: &dyn GraphStore, mutation: Mutation) -> Result<()> {
        match &mutation {
            Mutation::CreateNode { id } => {
                if self.node_exists(base, *id) || self.deleted_nodes.contains(id) {
                    return Err(StoreError::DuplicateNode(*id));
                }
                self.created_nodes.insert(*id);
            }
            Mutation::DeleteNode { id } => {
                let attached = self.relationships_of(base, *id, Direction::Both)?;
                if !attached.is_empty() {
                    return Err(StoreError::NodeHasRelationships {
                        node: *id,
                        count: attached.len(),
                    });
                }
                self.deleted_nodes.insert(*id);
                self.properties.retain(|(owner, _), _| *owner != EntityId::Node(*id));
            }
            Mutation::CreateRelationship {
                id,
                rel_type,
                start,
                end,
            } => {
                if self.relationship_exists(base, *id) || self.deleted_relationships.contains(id)
                {
                    return Err(StoreError::DuplicateRelationship(*id));
                }
                self.require(base, (*start).into())?;
                self.require(base, (*end).into())?;
                self.created_relationships.insert(
                    *id,
                    RelationshipHeader {
                        rel_type: rel_type.clone(),
                        start: *start,
                        end: *end,
                    },
                );
            }
            Mutation::DeleteRelationship { id } => {
                self.require(base, (*id).into())?;
                self.deleted_relationships.insert(*id);
                self.properties
                    .retain(|(owner, _), _| *owner != EntityId::Relationship(*id));
            }
            Mutation::SetProperty { entity, key, value } => {
                self.require(base, *entity)?;
                self.properties
                    .insert((*entity, key.clone()), Some(value.clone()));
            }
            Mutation::RemoveProperty { entity, key } => {
                self.require(base, *entity)?;
                self.properties.insert((*entity, key.clone()), None);
            }
        }
        self.changes.push(mutation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use replicant_core::REFERENCE_NODE;

    fn base() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        g.create_node_with_id(NodeId(1)).unwrap();
        g.create_relationship_with_id(RelationshipId(1), REFERENCE_NODE, NodeId(1), "HA_TEST")
            .unwrap();
        g.set_property(NodeId(1).into(), "name", "one".into())
            .unwrap();
        g
    }

    #[test]
    fn reads_see_pending_property_changes() {
        let g = base();
        let mut o = Overlay::new();
        o.record(
            &g,
            Mutation::SetProperty {
                entity: NodeId(1).into(),
                key: "yo".into(),
                value: "ya".into(),
            },
        )
        .unwrap();
        o.record(
            &g,
            Mutation::RemoveProperty {
                entity: NodeId(1).into(),
                key: "name".into(),
            },
        )
        .unwrap();

        assert_eq!(
            o.property(&g, NodeId(1).into(), "yo").unwrap(),
            Some(PropertyValue::from("ya"))
        );
        assert_eq!(o.property(&g, NodeId(1).into(), "name").unwrap(), None);
        assert_eq!(o.property_keys(&g, NodeId(1).into()).unwrap(), vec!["yo"]);
        // The base store is untouched.
        assert_eq!(
            g.get_property(NodeId(1).into(), "name").unwrap(),
            Some(&PropertyValue::from("one"))
        );
    }

    #[test]
    fn delete_node_requires_detaching_first() {
        let g = base();
        let mut o = Overlay::new();
        let err = o
            .record(&g, Mutation::DeleteNode { id: NodeId(1) })
            .unwrap_err();
        assert!(matches!(err, StoreError::NodeHasRelationships { .. }));
        assert!(o.is_empty());

        o.record(
            &g,
            Mutation::DeleteRelationship {
                id: RelationshipId(1),
            },
        )
        .unwrap();
        o.record(&g, Mutation::DeleteNode { id: NodeId(1) }).unwrap();
        assert!(!o.node_exists(&g, NodeId(1)));
        assert!(o
            .relationships_of(&g, REFERENCE_NODE, Direction::Outgoing)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn created_entities_are_visible_and_linkable() {
        let g = base();
        let mut o = Overlay::new();
        o.record(&g, Mutation::CreateNode { id: NodeId(2) }).unwrap();
        o.record(
            &g,
            Mutation::CreateRelationship {
                id: RelationshipId(2),
                rel_type: "HA_TEST".into(),
                start: NodeId(1),
                end: NodeId(2),
            },
        )
        .unwrap();

        assert_eq!(
            o.relationships_of(&g, NodeId(1), Direction::Outgoing)
                .unwrap(),
            vec![RelationshipId(2)]
        );
        assert_eq!(
            o.relationships_of(&g, NodeId(1), Direction::Both).unwrap(),
            vec![RelationshipId(1), RelationshipId(2)]
        );
        assert_eq!(
            o.endpoints(&g, RelationshipId(2)).unwrap(),
            (NodeId(1), NodeId(2))
        );
        assert_eq!(o.change_set().len(), 2);
    }

    #[test]
    fn property_on_deleted_entity_is_rejected() {
        let g = base();
        let mut o = Overlay::new();
        o.record(
            &g,
            Mutation::DeleteRelationship {
                id: RelationshipId(1),
            },
        )
        .unwrap();
        let err = o
            .record(
                &g,
                Mutation::SetProperty {
                    entity: RelationshipId(1).into(),
                    key: "k".into(),
                    value: 1i64.into(),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RelationshipNotFound(RelationshipId(1))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let g = base();
        let mut o = Overlay::new();
        assert!(matches!(
            o.record(&g, Mutation::CreateNode { id: NodeId(1) }),
            Err(StoreError::DuplicateNode(NodeId(1)))
        ));
    }
}
