//! A member's local copy of the graph.
//!
//! Every member, master included, owns one replica: the graph plus the
//! global id of the last log entry reflected in it. Replicas only change
//! by applying log entries in order, or by being replaced wholesale with a
//! copy of the master's store.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use replicant_core::{GlobalTxId, StoreId};
use replicant_log::LogEntry;
use replicant_store::{apply_change_set, MemoryGraph, Snapshot};

use crate::error::{ClusterError, Result};

struct ReplicaState {
    graph: MemoryGraph,
    high_water_mark: GlobalTxId,
}

pub struct Replica {
    store_id: StoreId,
    dir: Option<PathBuf>,
    state: RwLock<ReplicaState>,
}

impl Replica {
    /// A replica that is never written to disk.
    pub fn in_memory(snapshot: Snapshot) -> Self {
        Self {
            store_id: snapshot.store_id,
            dir: None,
            state: RwLock::new(ReplicaState {
                graph: snapshot.graph,
                high_water_mark: snapshot.high_water_mark,
            }),
        }
    }

    /// Persist `snapshot` to `dir` and serve it from there.
    pub fn create(dir: impl Into<PathBuf>, snapshot: Snapshot) -> Result<Self> {
        let dir = dir.into();
        snapshot.save(&dir)?;
        let mut replica = Self::in_memory(snapshot);
        replica.dir = Some(dir);
        Ok(replica)
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let snapshot = Snapshot::load(&dir)?;
        let mut replica = Self::in_memory(snapshot);
        replica.dir = Some(dir);
        Ok(replica)
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn state(&self) -> RwLockReadGuard<'_, ReplicaState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, ReplicaState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn high_water_mark(&self) -> GlobalTxId {
        self.state().high_water_mark
    }

    /// Run `f` against the current graph.
    pub fn read<R>(&self, f: impl FnOnce(&MemoryGraph) -> R) -> R {
        f(&self.state().graph)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            store_id: self.store_id,
            high_water_mark: state.high_water_mark,
            graph: state.graph.clone(),
        }
    }

    /// Apply one entry and persist. Returns false if it was already applied.
    pub fn apply(&self, entry: &LogEntry) -> Result<bool> {
        let applied = self.apply_all(std::slice::from_ref(entry))?;
        Ok(applied == 1)
    }

    /// Apply consecutive entries in order, persisting once at the end.
    ///
    /// Entries at or below the high-water-mark are skipped, so applying the
    /// same batch twice is harmless. Anything else that does not continue
    /// the sequence is refused.
    pub fn apply_all(&self, entries: &[LogEntry]) -> Result<usize> {
        let mut state = self.state_mut();
        let mut applied = 0;
        let mut outcome = Ok(());
        for entry in entries {
            if entry.id <= state.high_water_mark {
                continue;
            }
            if let Err(err) = apply_entry(&mut state, entry) {
                outcome = Err(err);
                break;
            }
            applied += 1;
        }
        if applied > 0 {
            self.persist_locked(&state)?;
        }
        outcome.map(|()| applied)
    }

    /// Throw away local state in favor of `snapshot`. The caller checks
    /// that both belong to the same store.
    pub fn replace(&self, snapshot: Snapshot) -> Result<()> {
        let mut state = self.state_mut();
        state.graph = snapshot.graph;
        state.high_water_mark = snapshot.high_water_mark;
        self.persist_locked(&state)
    }

    pub fn persist(&self) -> Result<()> {
        let state = self.state();
        self.persist_locked(&state)
    }

    fn persist_locked(&self, state: &ReplicaState) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        Snapshot {
            store_id: self.store_id,
            high_water_mark: state.high_water_mark,
            graph: state.graph.clone(),
        }
        .save(dir)?;
        Ok(())
    }
}

fn apply_entry(state: &mut ReplicaState, entry: &LogEntry) -> Result<()> {
    let expected = state.high_water_mark.next();
    if entry.id != expected {
        return Err(ClusterError::OutOfOrder {
            expected,
            got: entry.id,
        });
    }
    if !entry.verify_integrity() {
        return Err(ClusterError::IntegrityViolation(entry.id));
    }
    apply_change_set(&mut state.graph, &entry.change_set)?;
    state.high_water_mark = entry.id;
    Ok(())
}
