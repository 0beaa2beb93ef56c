//! Cluster members.
//!
//! A member is a replica plus a broker to the master. The master member
//! talks to its own services in-process; slaves additionally run an
//! [`UpdatePuller`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use replicant_core::{GlobalTxId, MemberId, Role, TxId};
use replicant_store::MemoryGraph;

use crate::broker::Broker;
use crate::coordinator::Transaction;
use crate::error::{ClusterError, Result};
use crate::messages::JoinRequest;
use crate::puller::{PullOutcome, UpdatePuller};
use crate::replica::Replica;

pub struct Member {
    id: MemberId,
    role: Role,
    replica: Arc<Replica>,
    broker: Arc<dyn Broker>,
    puller: Option<UpdatePuller>,
    next_local_tx: AtomicU64,
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("high_water_mark", &self.replica.high_water_mark())
            .finish()
    }
}

impl Member {
    /// Register with the master and start serving.
    ///
    /// `requested` is the id the member had before a restart.
    pub async fn join(
        role: Role,
        replica: Arc<Replica>,
        broker: Arc<dyn Broker>,
        requested: Option<MemberId>,
    ) -> Result<Arc<Self>> {
        let joined = broker
            .join(JoinRequest {
                member: requested,
                store_id: replica.store_id(),
            })
            .await?;
        let puller = match role {
            Role::Master => None,
            Role::Slave => Some(UpdatePuller::new(replica.clone(), broker.clone())),
        };
        tracing::info!(member = %joined.member, ?role, high_water_mark = %replica.high_water_mark(), "Member joined");
        Ok(Arc::new(Self {
            id: joined.member,
            role,
            replica,
            broker,
            puller,
            next_local_tx: AtomicU64::new(joined.next_local_tx),
        }))
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn high_water_mark(&self) -> GlobalTxId {
        self.replica.high_water_mark()
    }

    /// Run `f` against the member's committed graph.
    pub fn read<R>(&self, f: impl FnOnce(&MemoryGraph) -> R) -> R {
        self.replica.read(f)
    }

    pub fn begin_transaction(self: &Arc<Self>) -> Transaction {
        let local = self.next_local_tx.fetch_add(1, Ordering::SeqCst);
        Transaction::begin(
            self.clone(),
            TxId {
                member: self.id,
                local,
            },
        )
    }

    /// Fetch and apply what the master committed since the last pull.
    /// A no-op on the master.
    pub async fn pull_updates(&self) -> Result<PullOutcome> {
        match &self.puller {
            Some(puller) => puller.pull().await,
            None => Ok(PullOutcome {
                applied: 0,
                high_water_mark: self.high_water_mark(),
            }),
        }
    }

    /// Bring the replica up to at least `target`. Falls back to copying
    /// the master's store when the log no longer reaches back far enough.
    pub async fn catch_up(&self, target: GlobalTxId) -> Result<PullOutcome> {
        let Some(puller) = &self.puller else {
            return Ok(PullOutcome {
                applied: 0,
                high_water_mark: self.high_water_mark(),
            });
        };
        match puller.pull_until(target).await {
            Err(ClusterError::ReplicationGap { .. }) => {
                puller.resync(self.id).await?;
                puller.pull_until(target).await
            }
            other => other,
        }
    }

    pub async fn catch_up_to_master(&self) -> Result<PullOutcome> {
        if self.puller.is_none() {
            return self.catch_up(GlobalTxId::ZERO).await;
        }
        let target = self.broker.master_high_water_mark().await?;
        self.catch_up(target).await
    }

    /// Replace the local store with a copy of the master's.
    pub async fn resync(&self) -> Result<GlobalTxId> {
        match &self.puller {
            Some(puller) => puller.resync(self.id).await,
            None => Ok(self.high_water_mark()),
        }
    }
}
