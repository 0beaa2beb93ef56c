//! Slave-side replication: fetch committed entries from the master and
//! fold them into the local replica.

use std::sync::Arc;

use tokio::sync::Mutex;

use replicant_core::{GlobalTxId, MemberId};

use crate::broker::Broker;
use crate::error::{ClusterError, Result};
use crate::messages::PullRequest;
use crate::replica::Replica;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOutcome {
    /// Entries applied by this pull.
    pub applied: usize,
    pub high_water_mark: GlobalTxId,
}

pub struct UpdatePuller {
    replica: Arc<Replica>,
    broker: Arc<dyn Broker>,
    /// Serializes pulls of this member.
    in_flight: Mutex<()>,
}

impl UpdatePuller {
    pub fn new(replica: Arc<Replica>, broker: Arc<dyn Broker>) -> Self {
        Self {
            replica,
            broker,
            in_flight: Mutex::new(()),
        }
    }

    /// Apply everything the master committed after the local high-water-mark.
    ///
    /// On failure the replica keeps every entry applied before the failing
    /// one.
    pub async fn pull(&self) -> Result<PullOutcome> {
        let _pulling = self.in_flight.lock().await;
        let since = self.replica.high_water_mark();
        let response = self.broker.pull_updates(PullRequest { since }).await?;
        if response.entries.is_empty() {
            return Ok(PullOutcome {
                applied: 0,
                high_water_mark: since,
            });
        }

        let applied = self.replica.apply_all(&response.entries)?;
        let high_water_mark = self.replica.high_water_mark();
        tracing::info!(
            store_id = %self.replica.store_id(),
            from = %since,
            to = %high_water_mark,
            applied,
            "Pulled updates"
        );
        Ok(PullOutcome {
            applied,
            high_water_mark,
        })
    }

    /// Replace the replica with a copy of the master's store. This is the
    /// way out of a replication gap.
    pub async fn resync(&self, member: MemberId) -> Result<GlobalTxId> {
        let _pulling = self.in_flight.lock().await;
        let snapshot = self.broker.copy_store().await?;
        if snapshot.store_id != self.replica.store_id() {
            return Err(ClusterError::StoreMismatch {
                member,
                expected: snapshot.store_id,
                found: self.replica.store_id(),
            });
        }
        let from = self.replica.high_water_mark();
        let to = snapshot.high_water_mark;
        self.replica.replace(snapshot)?;
        tracing::info!(%member, %from, %to, "Replica resynchronized from master copy");
        Ok(to)
    }

    /// Pull until the replica reflects at least `target`, or the master has
    /// nothing more to give.
    pub async fn pull_until(&self, target: GlobalTxId) -> Result<PullOutcome> {
        let mut applied = 0;
        loop {
            let high_water_mark = self.replica.high_water_mark();
            if high_water_mark >= target {
                return Ok(PullOutcome {
                    applied,
                    high_water_mark,
                });
            }
            let outcome = self.pull().await?;
            if outcome.applied == 0 {
                tracing::warn!(%target, high_water_mark = %outcome.high_water_mark, "Master has nothing beyond local state");
                return Ok(PullOutcome { applied, ..outcome });
            }
            applied += outcome.applied;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::master::Master;
    use crate::messages::{CommitRequest, LockRequest};
    use replicant_core::{ChangeSet, MemberId, Mutation, TxId, REFERENCE_NODE};
    use replicant_store::GraphStore;

    async fn commit_property(master: &Master, local: u64) {
        let tx = TxId {
            member: MemberId::MASTER,
            local,
        };
        master
            .lock(LockRequest {
                resource: REFERENCE_NODE.into(),
                tx,
                mode: Default::default(),
            })
            .await
            .unwrap();
        master
            .commit(CommitRequest {
                tx,
                member: tx.member,
                change_set: ChangeSet::from(vec![Mutation::SetProperty {
                    entity: REFERENCE_NODE.into(),
                    key: "n".into(),
                    value: (local as i64).into(),
                }]),
            })
            .unwrap();
        master.release_locks(tx);
    }

    fn slave_of(master: &Arc<Master>) -> UpdatePuller {
        let replica = Arc::new(Replica::in_memory(master.copy_store()));
        UpdatePuller::new(replica, Arc::new(LocalBroker::new(master.clone())))
    }

    #[tokio::test]
    async fn pull_applies_new_entries_once() {
        let master = Arc::new(Master::in_memory());
        let puller = slave_of(&master);
        commit_property(&master, 1).await;
        commit_property(&master, 2).await;

        let outcome = puller.pull().await.unwrap();
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.high_water_mark, GlobalTxId(2));

        let again = puller.pull().await.unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(
            puller
                .replica
                .read(|g| g.get_property(REFERENCE_NODE.into(), "n").unwrap().cloned()),
            Some(2i64.into())
        );
    }

    #[tokio::test]
    async fn pull_until_reaches_target() {
        let master = Arc::new(Master::in_memory());
        let puller = slave_of(&master);
        commit_property(&master, 1).await;

        let outcome = puller.pull_until(GlobalTxId(1)).await.unwrap();
        assert_eq!(outcome.high_water_mark, GlobalTxId(1));
        // Already there: no request is made.
        let outcome = puller.pull_until(GlobalTxId(1)).await.unwrap();
        assert_eq!(outcome.applied, 0);
    }

    #[tokio::test]
    async fn concurrent_pulls_apply_each_entry_once() {
        let master = Arc::new(Master::in_memory());
        let puller = slave_of(&master);
        for local in 1..=3 {
            commit_property(&master, local).await;
        }

        let (first, second) = tokio::join!(puller.pull(), puller.pull());
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.applied + second.applied, 3);
        assert_eq!(first.high_water_mark, GlobalTxId(3));
        assert_eq!(second.high_water_mark, GlobalTxId(3));
        assert_eq!(puller.replica.high_water_mark(), GlobalTxId(3));
        assert_eq!(
            puller
                .replica
                .read(|g| g.get_property(REFERENCE_NODE.into(), "n").unwrap().cloned()),
            Some(3i64.into())
        );
    }
}
