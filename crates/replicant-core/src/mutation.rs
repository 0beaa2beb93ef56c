//! Mutation records and change sets.
//!
//! A change set is the ordered list of mutations a transaction produced.
//! It is what travels to the master on commit and what the log stores.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, NodeId, PropertyValue, RelationshipId};

/// One recorded graph mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateNode {
        id: NodeId,
    },
    DeleteNode {
        id: NodeId,
    },
    CreateRelationship {
        id: RelationshipId,
        rel_type: String,
        start: NodeId,
        end: NodeId,
    },
    DeleteRelationship {
        id: RelationshipId,
    },
    SetProperty {
        entity: EntityId,
        key: String,
        value: PropertyValue,
    },
    RemoveProperty {
        entity: EntityId,
        key: String,
    },
}

impl Mutation {
    /// The entity this mutation is about.
    pub fn entity(&self) -> EntityId {
        match self {
            Mutation::CreateNode { id } | Mutation::DeleteNode { id } => EntityId::Node(*id),
            Mutation::CreateRelationship { id, .. } | Mutation::DeleteRelationship { id } => {
                EntityId::Relationship(*id)
            }
            Mutation::SetProperty { entity, .. } | Mutation::RemoveProperty { entity, .. } => {
                *entity
            }
        }
    }
}

/// Ordered mutations of a single transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    mutations: Vec<Mutation>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }

    /// Every entity mentioned by the change set, in id order.
    pub fn touched(&self) -> BTreeSet<EntityId> {
        self.mutations.iter().map(Mutation::entity).collect()
    }
}

impl From<Vec<Mutation>> for ChangeSet {
    fn from(mutations: Vec<Mutation>) -> Self {
        Self { mutations }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_tags_are_snake_case() {
        let m = Mutation::RemoveProperty {
            entity: EntityId::Node(NodeId(3)),
            key: "name".into(),
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains(r#""op":"remove_property""#));
    }

    #[test]
    fn touched_deduplicates_entities() {
        let cs = ChangeSet::from(vec![
            Mutation::CreateNode { id: NodeId(1) },
            Mutation::SetProperty {
                entity: EntityId::Node(NodeId(1)),
                key: "a".into(),
                value: PropertyValue::Int(1),
            },
            Mutation::DeleteRelationship {
                id: RelationshipId(4),
            },
        ]);
        let touched: Vec<_> = cs.touched().into_iter().collect();
        assert_eq!(
            touched,
            vec![
                EntityId::Node(NodeId(1)),
                EntityId::Relationship(RelationshipId(4))
            ]
        );
    }
}
