//! Member snapshots on disk.
//!
//! A member's persisted state is one JSON file holding its store id, its
//! high-water-mark, and the full graph:
//! ```text
//! {data_dir}/
//!   graph.json
//! ```
//! Writes go to a temporary file that is then renamed over the old one,
//! so a crash never leaves a half-written snapshot behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use replicant_core::{GlobalTxId, StoreId};

use crate::error::{Result, StoreError};
use crate::graph::MemoryGraph;

const SNAPSHOT_FILE: &str = "graph.json";
const SNAPSHOT_TMP_FILE: &str = "graph.json.tmp";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub store_id: StoreId,
    /// Last global transaction fully reflected in `graph`.
    pub high_water_mark: GlobalTxId,
    pub graph: MemoryGraph,
}

impl Snapshot {
    /// A brand new data set: reference node only, nothing applied.
    pub fn fresh() -> Self {
        Self {
            store_id: StoreId::new(),
            high_water_mark: GlobalTxId::ZERO,
            graph: MemoryGraph::new(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(SNAPSHOT_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        if !path.is_file() {
            return Err(StoreError::SnapshotMissing(dir.display().to_string()));
        }
        let json = fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&json)?;
        tracing::debug!(
            path = %path.display(),
            store_id = %snapshot.store_id,
            high_water_mark = %snapshot.high_water_mark,
            nodes = snapshot.graph.node_count(),
            "Snapshot loaded"
        );
        Ok(snapshot)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let tmp = dir.join(SNAPSHOT_TMP_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, Self::path(dir))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use replicant_core::NodeId;

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut snapshot = Snapshot::fresh();
        snapshot.graph.create_node_with_id(NodeId(1)).unwrap();
        snapshot.high_water_mark = GlobalTxId(3);

        snapshot.save(dir.path()).unwrap();
        assert!(Snapshot::exists(dir.path()));

        let loaded = Snapshot::load(dir.path()).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn load_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let result = Snapshot::load(dir.path());
        assert!(matches!(result, Err(StoreError::SnapshotMissing(_))));
    }
}
