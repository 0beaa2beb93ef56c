//! The master's distributed lock manager.
//!
//! One exclusive lock per resource, held by at most one transaction.
//! Waiters queue in FIFO order. Before a request is allowed to wait, the
//! wait-for graph is checked: if the current holder already waits
//! (transitively) for the requester, the request is answered with
//! [`LockResponse::Deadlock`] and nothing is queued.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};

use replicant_core::{ResourceId, TxId};

use crate::error::{ClusterError, Result};
use crate::messages::LockResponse;

/// Who waits for whom.
///
/// A waiting transaction waits for exactly one resource, and every
/// resource has one holder, so each transaction has at most one outgoing
/// edge.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TxId, TxId>,
}

impl WaitForGraph {
    pub fn add_edge(&mut self, waiter: TxId, holder: TxId) {
        self.edges.insert(waiter, holder);
    }

    pub fn remove_edges_from(&mut self, waiter: TxId) {
        self.edges.remove(&waiter);
    }

    pub fn waits_for(&self, waiter: TxId) -> Option<TxId> {
        self.edges.get(&waiter).copied()
    }

    /// Whether `to` is reachable from `from` by following wait edges.
    pub fn reaches(&self, from: TxId, to: TxId) -> bool {
        let mut seen = HashSet::new();
        let mut current = from;
        while seen.insert(current) {
            if current == to {
                return true;
            }
            match self.edges.get(&current) {
                Some(next) => current = *next,
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

struct Waiter {
    tx: TxId,
    /// Identifies one request; a retry by the same transaction gets a new one.
    ticket: u64,
    grant: oneshot::Sender<()>,
}

struct LockEntry {
    holder: TxId,
    queue: VecDeque<Waiter>,
}

#[derive(Default)]
struct LockTable {
    locks: HashMap<ResourceId, LockEntry>,
    held: HashMap<TxId, BTreeSet<ResourceId>>,
    waiting: HashMap<TxId, ResourceId>,
    graph: WaitForGraph,
    next_ticket: u64,
}

impl LockTable {
    fn forget_waiter(&mut self, tx: TxId) {
        self.waiting.remove(&tx);
        self.graph.remove_edges_from(tx);
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Drop the queued request `ticket` of `tx`, if it is still queued.
    fn withdraw(&mut self, resource: ResourceId, tx: TxId, ticket: u64) -> bool {
        let Some(entry) = self.locks.get_mut(&resource) else {
            return false;
        };
        let before = entry.queue.len();
        entry.queue.retain(|w| w.ticket != ticket);
        if entry.queue.len() == before {
            return false;
        }
        self.forget_waiter(tx);
        true
    }

    /// Hand `resource` to the next waiter still listening, or free it.
    fn release(&mut self, resource: ResourceId, tx: TxId) -> bool {
        let Some(entry) = self.locks.get_mut(&resource) else {
            return false;
        };
        if entry.holder != tx {
            return false;
        }

        let mut abandoned = Vec::new();
        let mut next_holder = None;
        while let Some(waiter) = entry.queue.pop_front() {
            if waiter.tx == tx {
                continue;
            }
            if waiter.grant.send(()).is_ok() {
                next_holder = Some(waiter.tx);
                break;
            }
            abandoned.push(waiter.tx);
        }

        let remaining: Vec<TxId> = match next_holder {
            Some(holder) => {
                entry.holder = holder;
                entry.queue.iter().map(|w| w.tx).collect()
            }
            None => {
                self.locks.remove(&resource);
                Vec::new()
            }
        };

        if let Some(set) = self.held.get_mut(&tx) {
            set.remove(&resource);
            if set.is_empty() {
                self.held.remove(&tx);
            }
        }
        for gone in abandoned {
            self.forget_waiter(gone);
        }
        if let Some(holder) = next_holder {
            self.forget_waiter(holder);
            self.held.entry(holder).or_default().insert(resource);
            for waiter in remaining {
                self.graph.add_edge(waiter, holder);
            }
            tracing::debug!(%resource, from = %tx, to = %holder, "Lock handed over");
        } else {
            tracing::debug!(%resource, %tx, "Lock released");
        }
        true
    }
}

/// A queued request. Dropped before it settles, it takes itself out of the
/// queue, or gives back the lock if the grant already arrived.
struct PendingLock<'a> {
    locks: &'a LockManager,
    resource: ResourceId,
    tx: TxId,
    ticket: u64,
    granted: oneshot::Receiver<()>,
    settled: bool,
}

impl PendingLock<'_> {
    async fn wait(mut self) -> Result<LockResponse> {
        let outcome = (&mut self.granted).await;
        self.settled = true;
        match outcome {
            Ok(()) => Ok(LockResponse::Granted),
            Err(_) => Err(ClusterError::LockWaitAborted {
                tx: self.tx,
                resource: self.resource,
            }),
        }
    }
}

impl Drop for PendingLock<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let changed = {
            let mut table = self.locks.table();
            // Grants are sent under the table lock, so this cannot race one.
            match self.granted.try_recv() {
                Ok(()) => table.release(self.resource, self.tx),
                Err(_) => table.withdraw(self.resource, self.tx, self.ticket),
            }
        };
        if changed {
            tracing::debug!(resource = %self.resource, tx = %self.tx, "Lock request cancelled");
            self.locks.notify();
        }
    }
}

/// Exclusive per-resource locks with FIFO waiting and deadlock detection.
pub struct LockManager {
    table: Mutex<LockTable>,
    /// Bumped whenever the set of waiters changes.
    changes: watch::Sender<u64>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            table: Mutex::new(LockTable::default()),
            changes,
        }
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Acquire the write lock on `resource` for `tx`.
    ///
    /// Returns immediately when the lock is free or already held by `tx`,
    /// and with `Deadlock` when waiting would close a cycle. Otherwise the
    /// call waits until the lock is handed to `tx`. Dropping the returned
    /// future withdraws the request; a lock granted in the meantime is
    /// released again.
    pub async fn acquire(&self, resource: ResourceId, tx: TxId) -> Result<LockResponse> {
        let (pending, queued) = {
            let mut table = self.table();
            let current = table.locks.get(&resource).map(|e| e.holder);
            let holder = match current {
                None => {
                    table.locks.insert(
                        resource,
                        LockEntry {
                            holder: tx,
                            queue: VecDeque::new(),
                        },
                    );
                    table.held.entry(tx).or_default().insert(resource);
                    tracing::debug!(%resource, %tx, "Lock granted");
                    return Ok(LockResponse::Granted);
                }
                Some(holder) => holder,
            };
            if holder == tx {
                return Ok(LockResponse::Granted);
            }

            let (grant, granted) = oneshot::channel();
            let ticket = table.ticket();
            let retry = table.waiting.get(&tx) == Some(&resource);
            let retried = if retry {
                table
                    .locks
                    .get_mut(&resource)
                    .and_then(|entry| entry.queue.iter_mut().find(|w| w.tx == tx))
            } else {
                None
            };
            let queued = match retried {
                // A retry takes over the queued request and keeps its place.
                Some(waiter) => {
                    waiter.ticket = ticket;
                    waiter.grant = grant;
                    tracing::debug!(%resource, %tx, %holder, "Lock request retried");
                    false
                }
                None => {
                    if table.graph.reaches(holder, tx) {
                        tracing::warn!(%resource, %tx, %holder, "Deadlock detected");
                        return Ok(LockResponse::Deadlock);
                    }
                    if let Some(entry) = table.locks.get_mut(&resource) {
                        entry.queue.push_back(Waiter { tx, ticket, grant });
                    }
                    table.graph.add_edge(tx, holder);
                    table.waiting.insert(tx, resource);
                    tracing::debug!(%resource, %tx, %holder, "Waiting for lock");
                    true
                }
            };
            let pending = PendingLock {
                locks: self,
                resource,
                tx,
                ticket,
                granted,
                settled: false,
            };
            (pending, queued)
        };
        if queued {
            self.notify();
        }
        pending.wait().await
    }

    /// Release one lock. Returns false when `tx` did not hold it.
    pub fn release(&self, resource: ResourceId, tx: TxId) -> bool {
        let released = self.table().release(resource, tx);
        if released {
            self.notify();
        }
        released
    }

    /// Release everything `tx` holds and withdraw any pending request.
    pub fn release_all(&self, tx: TxId) -> Vec<ResourceId> {
        let released: Vec<ResourceId> = {
            let mut table = self.table();
            if let Some(resource) = table.waiting.get(&tx).copied() {
                if let Some(entry) = table.locks.get_mut(&resource) {
                    entry.queue.retain(|w| w.tx != tx);
                }
                table.forget_waiter(tx);
            }
            let held: Vec<ResourceId> = table
                .held
                .get(&tx)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            held.into_iter()
                .filter(|resource| table.release(*resource, tx))
                .collect()
        };
        self.notify();
        released
    }

    pub fn holder(&self, resource: ResourceId) -> Option<TxId> {
        self.table().locks.get(&resource).map(|e| e.holder)
    }

    pub fn held_by(&self, tx: TxId) -> Vec<ResourceId> {
        self.table()
            .held
            .get(&tx)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn holds_all(&self, tx: TxId, resources: &BTreeSet<ResourceId>) -> bool {
        let table = self.table();
        match table.held.get(&tx) {
            Some(held) => resources.is_subset(held),
            None => resources.is_empty(),
        }
    }

    /// Queued transactions for `resource`, in grant order.
    pub fn waiters(&self, resource: ResourceId) -> Vec<TxId> {
        self.table()
            .locks
            .get(&resource)
            .map(|e| e.queue.iter().map(|w| w.tx).collect())
            .unwrap_or_default()
    }

    /// Resolve once at least `count` transactions wait for `resource`.
    pub async fn wait_for_waiters(&self, resource: ResourceId, count: usize) {
        loop {
            let mut changed = self.changes.subscribe();
            if self.waiters(resource).len() >= count {
                return;
            }
            if changed.changed().await.is_err() {
                return;
            }
        }
    }
}
