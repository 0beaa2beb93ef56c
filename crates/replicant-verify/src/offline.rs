//! Verification of persisted member snapshots.
//!
//! Used after a restart: every store is loaded straight from its data
//! directory, without a running cluster.

use std::path::{Path, PathBuf};

use replicant_store::Snapshot;

use crate::compare::ConsistencyVerifier;
use crate::error::{Result, VerifyError};
use crate::VerificationReport;

/// Compare the stores persisted in `others` against the one in `reference`.
///
/// All stores must carry the reference's store id.
pub fn verify_dirs(
    verifier: &ConsistencyVerifier,
    reference: &Path,
    others: &[PathBuf],
) -> Result<VerificationReport> {
    let master = Snapshot::load(reference)?;
    let mut copies = Vec::with_capacity(others.len());
    for dir in others {
        let copy = Snapshot::load(dir)?;
        if copy.store_id != master.store_id {
            return Err(VerifyError::ForeignStore {
                path: dir.clone(),
                expected: master.store_id,
                found: copy.store_id,
            });
        }
        tracing::info!(
            path = %dir.display(),
            high_water_mark = %copy.high_water_mark,
            "Loaded member snapshot"
        );
        copies.push(copy);
    }

    verifier.compare_all(
        &master.graph,
        copies
            .iter()
            .map(|c| &c.graph as &dyn replicant_store::GraphStore),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_core::{NodeId, StoreId};
    use replicant_store::GraphStore;

    #[test]
    fn persisted_copies_verify() {
        let root = tempfile::tempdir().unwrap();
        let mut snapshot = Snapshot::fresh();
        snapshot.graph.create_node_with_id(NodeId(1)).unwrap();
        snapshot.save(&root.path().join("master")).unwrap();
        snapshot.save(&root.path().join("slave-0")).unwrap();

        let report = verify_dirs(
            &ConsistencyVerifier::new(),
            &root.path().join("master"),
            &[root.path().join("slave-0")],
        )
        .unwrap();
        assert_eq!(report.members_checked, 1);
        assert_eq!(report.nodes_checked, 2);
    }

    #[test]
    fn foreign_store_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::fresh();
        snapshot.save(&root.path().join("master")).unwrap();
        let foreign = Snapshot {
            store_id: StoreId::new(),
            ..snapshot
        };
        foreign.save(&root.path().join("slave-0")).unwrap();

        let err = verify_dirs(
            &ConsistencyVerifier::new(),
            &root.path().join("master"),
            &[root.path().join("slave-0")],
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::ForeignStore { .. }));
    }
}
