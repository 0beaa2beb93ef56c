//! How a member reaches the master.

use std::sync::Arc;

use async_trait::async_trait;

use replicant_core::{EntityKind, GlobalTxId, ResourceId, TxId};
use replicant_store::Snapshot;

use crate::error::Result;
use crate::master::Master;
use crate::messages::{
    CommitRequest, CommitResponse, JoinRequest, JoinResponse, LockRequest, LockResponse,
    PullRequest, PullResponse,
};

/// Every master service a member uses.
///
/// On the master itself these are plain calls; slaves would send them
/// over the wire.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn join(&self, request: JoinRequest) -> Result<JoinResponse>;

    /// Blocks while another transaction holds the lock.
    async fn request_lock(&self, request: LockRequest) -> Result<LockResponse>;

    async fn release_locks(&self, tx: TxId) -> Result<Vec<ResourceId>>;

    /// Next unused raw id in the `kind` id space.
    async fn allocate_id(&self, kind: EntityKind) -> Result<u64>;

    async fn commit(&self, request: CommitRequest) -> Result<CommitResponse>;

    async fn pull_updates(&self, request: PullRequest) -> Result<PullResponse>;

    async fn master_high_water_mark(&self) -> Result<GlobalTxId>;

    async fn copy_store(&self) -> Result<Snapshot>;
}

/// In-process broker: calls go straight to a shared [`Master`].
#[derive(Clone)]
pub struct LocalBroker {
    master: Arc<Master>,
}

impl LocalBroker {
    pub fn new(master: Arc<Master>) -> Self {
        Self { master }
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn join(&self, request: JoinRequest) -> Result<JoinResponse> {
        self.master.register(request)
    }

    async fn request_lock(&self, request: LockRequest) -> Result<LockResponse> {
        self.master.lock(request).await
    }

    async fn release_locks(&self, tx: TxId) -> Result<Vec<ResourceId>> {
        Ok(self.master.release_locks(tx))
    }

    async fn allocate_id(&self, kind: EntityKind) -> Result<u64> {
        Ok(self.master.allocate_id(kind))
    }

    async fn commit(&self, request: CommitRequest) -> Result<CommitResponse> {
        self.master.commit(request)
    }

    async fn pull_updates(&self, request: PullRequest) -> Result<PullResponse> {
        Ok(PullResponse {
            entries: self.master.pull(request.since)?,
        })
    }

    async fn master_high_water_mark(&self) -> Result<GlobalTxId> {
        Ok(self.master.high_water_mark())
    }

    async fn copy_store(&self) -> Result<Snapshot> {
        Ok(self.master.copy_store())
    }
}
