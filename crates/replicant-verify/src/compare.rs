//! Node-by-node comparison of two stores.

use std::collections::{BTreeMap, BTreeSet};

use replicant_core::{Direction, PropertyValue};
use replicant_store::{GraphStore, Node, PropertyContainer, StoreError};

use crate::digest::graph_digest;
use crate::error::{Result, VerifyError};
use crate::VerificationReport;

type NodeFilter = Box<dyn Fn(&Node) -> bool + Send + Sync>;

/// Checks that other stores faithfully replicate a reference store.
///
/// Every node of the reference (that passes the filter) must exist in the
/// other store with identical properties and identical outgoing
/// relationships. Extra entities only present in the other store are not
/// reported, so a replica ahead of a stale reference does not fail.
#[derive(Default)]
pub struct ConsistencyVerifier {
    filter: Option<NodeFilter>,
}

impl ConsistencyVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only verify reference nodes for which `filter` returns true.
    pub fn with_filter(mut self, filter: impl Fn(&Node) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    fn included(&self, node: &Node) -> bool {
        self.filter.as_ref().map_or(true, |f| f(node))
    }

    pub fn compare(
        &self,
        reference: &dyn GraphStore,
        other: &dyn GraphStore,
    ) -> Result<VerificationReport> {
        let mut report = VerificationReport {
            members_checked: 1,
            reference_digest: graph_digest(reference)?,
            ..Default::default()
        };

        for id in reference.node_ids() {
            let node = reference.node(id)?;
            if !self.included(node) {
                continue;
            }
            let theirs = match other.node(id) {
                Ok(n) => n,
                Err(StoreError::NodeNotFound(_)) => {
                    return Err(VerifyError::StructuralMismatch(format!(
                        "Node[{id}] is missing"
                    )));
                }
                Err(err) => return Err(err.into()),
            };
            report.properties_checked +=
                compare_properties(&format!("Node[{id}]"), node, theirs)?;
            report.nodes_checked += 1;

            let ours: BTreeSet<_> = reference
                .relationships_of(id, Direction::Outgoing)?
                .into_iter()
                .collect();
            let theirs: BTreeSet<_> = other
                .relationships_of(id, Direction::Outgoing)?
                .into_iter()
                .collect();
            if ours != theirs {
                return Err(VerifyError::StructuralMismatch(format!(
                    "Node[{id}] outgoing relationships differ: {} vs {}",
                    list(&ours),
                    list(&theirs)
                )));
            }

            for rel_id in ours {
                let rel = reference.relationship(rel_id)?;
                let copy = other.relationship(rel_id)?;
                if (rel.start, rel.end) != (copy.start, copy.end) {
                    return Err(VerifyError::StructuralMismatch(format!(
                        "Relationship[{rel_id}] connects {}->{} but {}->{} in the copy",
                        rel.start, rel.end, copy.start, copy.end
                    )));
                }
                if rel.rel_type != copy.rel_type {
                    return Err(VerifyError::StructuralMismatch(format!(
                        "Relationship[{rel_id}] has type {} but {} in the copy",
                        rel.rel_type, copy.rel_type
                    )));
                }
                report.properties_checked +=
                    compare_properties(&format!("Relationship[{rel_id}]"), rel, copy)?;
                report.relationships_checked += 1;
            }
        }
        Ok(report)
    }

    /// Compare every store in `others` to `reference`, stopping at the first
    /// failing one.
    pub fn compare_all<'a>(
        &self,
        reference: &dyn GraphStore,
        others: impl IntoIterator<Item = &'a dyn GraphStore>,
    ) -> Result<VerificationReport> {
        let mut total = VerificationReport {
            reference_digest: graph_digest(reference)?,
            ..Default::default()
        };
        for (index, other) in others.into_iter().enumerate() {
            let report = self
                .compare(reference, other)
                .map_err(|err| VerifyError::Member {
                    index,
                    source: Box::new(err),
                })?;
            tracing::debug!(index, nodes = report.nodes_checked, "Member verified");
            total.absorb(&report);
        }
        tracing::info!(
            members = total.members_checked,
            nodes = total.nodes_checked,
            relationships = total.relationships_checked,
            digest = %total.reference_digest,
            "Consistency verified"
        );
        Ok(total)
    }
}

fn compare_properties(
    what: &str,
    ours: &dyn PropertyContainer,
    theirs: &dyn PropertyContainer,
) -> Result<usize> {
    let a: &BTreeMap<String, PropertyValue> = ours.properties();
    let b = theirs.properties();
    let keys_a: BTreeSet<&String> = a.keys().collect();
    let keys_b: BTreeSet<&String> = b.keys().collect();
    if keys_a != keys_b {
        let missing: Vec<_> = keys_a.difference(&keys_b).collect();
        let extra: Vec<_> = keys_b.difference(&keys_a).collect();
        return Err(VerifyError::PropertyMismatch(format!(
            "{what} property keys differ: missing {missing:?}, unexpected {extra:?}"
        )));
    }
    for (key, value) in a {
        if b.get(key) != Some(value) {
            let found = b
                .get(key)
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(VerifyError::PropertyMismatch(format!(
                "{what} property {key:?} is {value} but {found} in the copy"
            )));
        }
    }
    Ok(a.len())
}

fn list<T: std::fmt::Display>(ids: &BTreeSet<T>) -> String {
    let items: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_core::{NodeId, RelationshipId, REFERENCE_NODE};
    use replicant_store::MemoryGraph;

    fn sample() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        g.create_node_with_id(NodeId(1)).unwrap();
        g.create_relationship_with_id(RelationshipId(0), REFERENCE_NODE, NodeId(1), "HA_TEST")
            .unwrap();
        g.set_property(NodeId(1).into(), "name", "Mattias".into())
            .unwrap();
        g.set_property(RelationshipId(0).into(), "weight", 4i64.into())
            .unwrap();
        g
    }

    #[test]
    fn identical_graphs_verify() {
        let report = ConsistencyVerifier::new()
            .compare(&sample(), &sample())
            .unwrap();
        assert_eq!(report.nodes_checked, 2);
        assert_eq!(report.relationships_checked, 1);
        assert_eq!(report.properties_checked, 2);
    }

    #[test]
    fn missing_node_is_structural() {
        let mut reference = sample();
        reference.create_node_with_id(NodeId(5)).unwrap();

        let err = ConsistencyVerifier::new()
            .compare(&reference, &sample())
            .unwrap_err();
        assert!(matches!(err, VerifyError::StructuralMismatch(msg) if msg.contains("Node[5]")));
    }

    #[test]
    fn differing_value_is_property_mismatch() {
        let mut other = sample();
        other
            .set_property(NodeId(1).into(), "name", "Johan".into())
            .unwrap();
        let err = ConsistencyVerifier::new()
            .compare(&sample(), &other)
            .unwrap_err();
        assert!(matches!(err, VerifyError::PropertyMismatch(msg) if msg.contains("name")));
    }

    #[test]
    fn relationship_property_is_checked() {
        let mut other = sample();
        other
            .remove_property(RelationshipId(0).into(), "weight")
            .unwrap();
        let err = ConsistencyVerifier::new()
            .compare(&sample(), &other)
            .unwrap_err();
        assert!(matches!(err, VerifyError::PropertyMismatch(_)));
    }

    #[test]
    fn missing_relationship_is_structural() {
        let mut other = sample();
        other.delete_relationship(RelationshipId(0)).unwrap();
        let err = ConsistencyVerifier::new()
            .compare(&sample(), &other)
            .unwrap_err();
        assert!(matches!(err, VerifyError::StructuralMismatch(_)));
    }

    #[test]
    fn filter_skips_nodes() {
        let mut reference = sample();
        reference.create_node_with_id(NodeId(5)).unwrap();
        let report = ConsistencyVerifier::new()
            .with_filter(|node| node.id != NodeId(5))
            .compare(&reference, &sample())
            .unwrap();
        assert_eq!(report.nodes_checked, 2);
    }

    #[test]
    fn compare_all_names_failing_member() {
        let good = sample();
        let mut bad = sample();
        bad.set_property(REFERENCE_NODE.into(), "x", true.into())
            .unwrap();
        let others: Vec<&dyn GraphStore> = vec![&good, &bad];

        let err = ConsistencyVerifier::new()
            .compare_all(&good, others)
            .unwrap_err();
        assert_eq!(err.member_index(), Some(1));
    }
}
