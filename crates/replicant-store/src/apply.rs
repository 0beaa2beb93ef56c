//! All-or-nothing application of change sets.

use replicant_core::{ChangeSet, Mutation};

use crate::error::Result;
use crate::graph::GraphStore;
use crate::overlay::Overlay;

/// Check that every mutation of `changes` would succeed, in order, on `store`.
pub fn validate_change_set(store: &dyn GraphStore, changes: &ChangeSet) -> Result<()> {
    let mut overlay = Overlay::new();
    for mutation in changes {
        overlay.record(store, mutation.clone())?;
    }
    Ok(())
}

/// Apply `changes` to `store`. Nothing is applied unless everything validates.
pub fn apply_change_set(store: &mut dyn GraphStore, changes: &ChangeSet) -> Result<()> {
    validate_change_set(store, changes)?;
    for mutation in changes {
        apply_mutation(store, mutation)?;
    }
    Ok(())
}

fn apply_mutation(store: &mut dyn GraphStore, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::CreateNode { id } => store.create_node_with_id(*id),
        Mutation::DeleteNode { id } => store.delete_node(*id),
        Mutation::CreateRelationship {
            id,
            rel_type,
            start,
            end,
        } => store.create_relationship_with_id(*id, *start, *end, rel_type),
        Mutation::DeleteRelationship { id } => store.delete_relationship(*id),
        Mutation::SetProperty { entity, key, value } => store
            .set_property(*entity, key, value.clone())
            .map(|_| ()),
        Mutation::RemoveProperty { entity, key } => {
            store.remove_property(*entity, key).map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::graph::MemoryGraph;
    use replicant_core::{NodeId, PropertyValue, RelationshipId, REFERENCE_NODE};

    #[test]
    fn applies_in_order() {
        let mut g = MemoryGraph::new();
        let cs = ChangeSet::from(vec![
            Mutation::CreateNode { id: NodeId(1) },
            Mutation::CreateRelationship {
                id: RelationshipId(1),
                rel_type: "HA_TEST".into(),
                start: REFERENCE_NODE,
                end: NodeId(1),
            },
            Mutation::SetProperty {
                entity: NodeId(1).into(),
                key: "name".into(),
                value: "Mattias".into(),
            },
        ]);
        apply_change_set(&mut g, &cs).unwrap();

        assert_eq!(g.node_count(), 2);
        assert_eq!(
            g.get_property(NodeId(1).into(), "name").unwrap(),
            Some(&PropertyValue::from("Mattias"))
        );
    }

    #[test]
    fn failing_change_set_applies_nothing() {
        let mut g = MemoryGraph::new();
        let before = g.clone();
        let cs = ChangeSet::from(vec![
            Mutation::CreateNode { id: NodeId(1) },
            Mutation::SetProperty {
                entity: NodeId(2).into(),
                key: "k".into(),
                value: 1i64.into(),
            },
        ]);
        let err = apply_change_set(&mut g, &cs).unwrap_err();
        assert!(matches!(err, StoreError::NodeNotFound(NodeId(2))));
        assert_eq!(g, before);
    }
}
