//! The master member's authoritative services.
//!
//! The master owns the lock manager, the transaction log, and id
//! allocation. Its own replica is updated as part of every commit, so it
//! is never behind the log.
//!
//! On-disk layout of a master's data directory:
//! ```text
//! {dir}/
//!   graph.json    replica snapshot
//!   ids.json      next node / relationship id
//!   txlog/        transaction log
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use replicant_core::{EntityKind, GlobalTxId, MemberId, ResourceId, TxId};
use replicant_log::{LogEntry, LogError, TransactionLog};
use replicant_store::{validate_change_set, GraphStore, Snapshot};

use crate::error::{ClusterError, Result};
use crate::lock::LockManager;
use crate::messages::{
    CommitRequest, CommitResponse, JoinRequest, JoinResponse, LockRequest, LockResponse,
};
use crate::replica::Replica;

const IDS_FILE: &str = "ids.json";
const LOG_DIR: &str = "txlog";

/// Next unused ids. Never move backwards, so ids of deleted entities are
/// not handed out again.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
struct IdMarks {
    next_node: u64,
    next_relationship: u64,
}

impl IdMarks {
    fn covering(graph: &dyn GraphStore) -> Self {
        Self {
            next_node: graph.highest_node_id().map_or(0, |id| id.0 + 1),
            next_relationship: graph.highest_relationship_id().map_or(0, |id| id.0 + 1),
        }
    }

    fn max(self, other: Self) -> Self {
        Self {
            next_node: self.next_node.max(other.next_node),
            next_relationship: self.next_relationship.max(other.next_relationship),
        }
    }
}

pub struct Master {
    replica: Arc<Replica>,
    locks: LockManager,
    log: Mutex<TransactionLog>,
    ids: Mutex<IdMarks>,
    members: Mutex<BTreeSet<MemberId>>,
    next_member: AtomicU32,
    log_retain: Option<u64>,
}

impl Master {
    fn assemble(replica: Replica, log: TransactionLog, ids: IdMarks) -> Self {
        Self {
            replica: Arc::new(replica),
            locks: LockManager::new(),
            log: Mutex::new(log),
            ids: Mutex::new(ids),
            members: Mutex::new(BTreeSet::from([MemberId::MASTER])),
            next_member: AtomicU32::new(1),
            log_retain: None,
        }
    }

    /// A master for a fresh store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        let replica = Replica::in_memory(Snapshot::fresh());
        let ids = replica.read(|g| IdMarks::covering(g));
        Self::assemble(replica, TransactionLog::in_memory(), ids)
    }

    /// Initialize a fresh store in `dir`.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let replica = Replica::create(&dir, Snapshot::fresh())?;
        let log = TransactionLog::open(dir.join(LOG_DIR))?;
        let ids = replica.read(|g| IdMarks::covering(g));
        write_ids(&dir, &ids)?;
        tracing::info!(dir = %dir.display(), store_id = %replica.store_id(), "Master store created");
        Ok(Self::assemble(replica, log, ids))
    }

    /// Reopen the store in `dir`, replaying log entries the snapshot lacks.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let replica = Replica::open(&dir)?;
        let log = TransactionLog::open(dir.join(LOG_DIR))?;

        let snapshot_mark = replica.high_water_mark();
        if snapshot_mark > log.last_id() {
            return Err(LogError::Corrupt {
                id: log.last_id(),
                reason: format!("log ends before snapshot at {snapshot_mark}"),
            }
            .into());
        }
        let pending = log.entries_since(snapshot_mark)?;
        let replayed = replica.apply_all(&pending)?;

        let stored = read_ids(&dir)?;
        let ids = replica.read(|g| IdMarks::covering(g)).max(stored);
        let next_member = log
            .entries_since(GlobalTxId(log.first_retained_id().0.saturating_sub(1)))?
            .iter()
            .map(|e| e.member.0 + 1)
            .max()
            .unwrap_or(1);

        tracing::info!(
            dir = %dir.display(),
            high_water_mark = %replica.high_water_mark(),
            replayed,
            "Master store opened"
        );
        let master = Self::assemble(replica, log, ids);
        master.next_member.store(next_member, Ordering::SeqCst);
        Ok(master)
    }

    /// Keep at most `retain` entries in the log after each commit.
    pub fn with_log_retain(mut self, retain: Option<u64>) -> Self {
        self.log_retain = retain;
        self
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    fn log(&self) -> MutexGuard<'_, TransactionLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn high_water_mark(&self) -> GlobalTxId {
        self.log().last_id()
    }

    pub fn first_retained_id(&self) -> GlobalTxId {
        self.log().first_retained_id()
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Admit a member whose store was seeded from this master's.
    pub fn register(&self, request: JoinRequest) -> Result<JoinResponse> {
        if request.store_id != self.replica.store_id() {
            return Err(ClusterError::StoreMismatch {
                member: request.member.unwrap_or_default(),
                expected: self.replica.store_id(),
                found: request.store_id,
            });
        }
        let member = match request.member {
            Some(id) => {
                self.next_member.fetch_max(id.0 + 1, Ordering::SeqCst);
                id
            }
            None => MemberId(self.next_member.fetch_add(1, Ordering::SeqCst)),
        };
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member);

        let next_local_tx = self.log().last_local_tx(member) + 1;
        tracing::info!(%member, next_local_tx, "Member registered");
        Ok(JoinResponse {
            member,
            next_local_tx,
        })
    }

    pub async fn lock(&self, request: LockRequest) -> Result<LockResponse> {
        self.locks.acquire(request.resource, request.tx).await
    }

    pub fn release_locks(&self, tx: TxId) -> Vec<ResourceId> {
        self.locks.release_all(tx)
    }

    pub fn allocate_id(&self, kind: EntityKind) -> u64 {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match kind {
            EntityKind::Node => &mut ids.next_node,
            EntityKind::Relationship => &mut ids.next_relationship,
        };
        let id = *next;
        *next += 1;
        id
    }

    /// Validate, order, and apply one transaction's change set.
    ///
    /// A request for a transaction that is already in the log is answered
    /// with its original global id. Semantic failures are answered with
    /// `Rejected`; only infrastructure failures are errors.
    pub fn commit(&self, request: CommitRequest) -> Result<CommitResponse> {
        let CommitRequest {
            tx,
            member,
            change_set,
        } = request;
        let mut log = self.log();

        if let Some(global_id) = log.committed_id(&tx) {
            tracing::debug!(%tx, %global_id, "Commit already applied");
            return Ok(CommitResponse::Committed { global_id });
        }

        let unlocked = change_set
            .touched()
            .into_iter()
            .find(|resource| self.locks.holder(*resource) != Some(tx));
        if let Some(resource) = unlocked {
            return Ok(reject(tx, format!("{resource} is not write locked by {tx}")));
        }
        if let Err(err) = self.replica.read(|g| validate_change_set(g, &change_set)) {
            return Ok(reject(tx, err.to_string()));
        }

        let mutations = change_set.len();
        let entry = log.append(member, tx, change_set)?;
        self.replica.apply(&entry)?;
        if let Some(dir) = self.replica.dir() {
            let ids = *self.ids.lock().unwrap_or_else(PoisonError::into_inner);
            write_ids(dir, &ids)?;
        }
        if let Some(retain) = self.log_retain {
            log.truncate_before(GlobalTxId((entry.id.0 + 1).saturating_sub(retain)))?;
        }

        tracing::info!(global_id = %entry.id, %tx, %member, mutations, "Transaction committed");
        Ok(CommitResponse::Committed {
            global_id: entry.id,
        })
    }

    /// Committed entries after `since`.
    pub fn pull(&self, since: GlobalTxId) -> Result<Vec<LogEntry>> {
        Ok(self.log().entries_since(since)?)
    }

    /// A consistent copy of the master's store, for seeding or resyncing.
    pub fn copy_store(&self) -> Snapshot {
        let _log = self.log();
        self.replica.snapshot()
    }
}

fn reject(tx: TxId, reason: String) -> CommitResponse {
    tracing::warn!(%tx, %reason, "Commit rejected");
    CommitResponse::Rejected { reason }
}

fn read_ids(dir: &Path) -> Result<IdMarks> {
    let path = dir.join(IDS_FILE);
    if !path.is_file() {
        return Ok(IdMarks::default());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn write_ids(dir: &Path, ids: &IdMarks) -> Result<()> {
    let path = dir.join(IDS_FILE);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(ids)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}
