//! Per-member transactions.
//!
//! A [`Transaction`] buffers its mutations in an [`Overlay`] over the
//! member's replica and takes the master's write lock on every resource
//! before touching it for the first time. Nothing reaches the master's
//! log until [`Transaction::end`] commits the buffered change set.

use std::collections::BTreeSet;
use std::sync::Arc;

use replicant_core::{
    Direction, EntityId, EntityKind, GlobalTxId, Mutation, NodeId, PropertyValue,
    RelationshipId, ResourceId, Role, TxId, TxState,
};
use replicant_store::Overlay;

use crate::error::{ClusterError, Result};
use crate::member::Member;
use crate::messages::{CommitRequest, CommitResponse, LockMode, LockRequest, LockResponse};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `global_id` is `None` when there was nothing to commit.
    Committed { global_id: Option<GlobalTxId> },
    RolledBack,
}

pub struct Transaction {
    member: Arc<Member>,
    id: TxId,
    state: TxState,
    overlay: Overlay,
    locks: BTreeSet<ResourceId>,
}

impl Transaction {
    pub(crate) fn begin(member: Arc<Member>, id: TxId) -> Self {
        tracing::debug!(tx = %id, "Transaction started");
        Self {
            member,
            id,
            state: TxState::Active,
            overlay: Overlay::new(),
            locks: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn member(&self) -> &Arc<Member> {
        &self.member
    }

    /// Resources this transaction holds the write lock on.
    pub fn locks(&self) -> &BTreeSet<ResourceId> {
        &self.locks
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TxState::Active | TxState::MarkedSuccess => Ok(()),
            state => Err(ClusterError::NotActive { tx: self.id, state }),
        }
    }

    /// Take the write lock on `resource` unless already held.
    ///
    /// A slave catches up with the master after each new grant, so the
    /// locked resource is read in its latest committed state.
    async fn lock(&mut self, resource: ResourceId) -> Result<()> {
        if self.locks.contains(&resource) {
            return Ok(());
        }
        let request = LockRequest {
            resource,
            tx: self.id,
            mode: LockMode::Write,
        };
        match self.member.broker().request_lock(request).await {
            Ok(LockResponse::Granted) => {
                self.locks.insert(resource);
            }
            Ok(LockResponse::Deadlock) => {
                self.state = TxState::MarkedFailed;
                return Err(ClusterError::DeadlockDetected {
                    tx: self.id,
                    resource,
                });
            }
            Err(err) => {
                self.state = TxState::MarkedFailed;
                return Err(err);
            }
        }
        if self.member.role() == Role::Slave {
            self.member.catch_up_to_master().await?;
        }
        Ok(())
    }

    fn record(&mut self, mutation: Mutation) -> Result<()> {
        let overlay = &mut self.overlay;
        self.member
            .replica()
            .read(|graph| overlay.record(graph, mutation))?;
        Ok(())
    }

    /// Lock `entity` without changing it.
    pub async fn acquire_write_lock(&mut self, entity: EntityId) -> Result<()> {
        self.ensure_open()?;
        self.lock(entity).await
    }

    pub async fn create_node(&mut self) -> Result<NodeId> {
        self.ensure_open()?;
        let id = NodeId(self.member.broker().allocate_id(EntityKind::Node).await?);
        self.lock(id.into()).await?;
        self.record(Mutation::CreateNode { id })?;
        Ok(id)
    }

    pub async fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<RelationshipId> {
        self.ensure_open()?;
        self.lock(start.into()).await?;
        self.lock(end.into()).await?;
        let id = RelationshipId(
            self.member
                .broker()
                .allocate_id(EntityKind::Relationship)
                .await?,
        );
        self.lock(id.into()).await?;
        self.record(Mutation::CreateRelationship {
            id,
            rel_type: rel_type.to_string(),
            start,
            end,
        })?;
        Ok(id)
    }

    pub async fn set_property(
        &mut self,
        entity: EntityId,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.lock(entity).await?;
        self.record(Mutation::SetProperty {
            entity,
            key: key.to_string(),
            value: value.into(),
        })
    }

    /// Returns the value that was removed.
    pub async fn remove_property(
        &mut self,
        entity: EntityId,
        key: &str,
    ) -> Result<Option<PropertyValue>> {
        self.ensure_open()?;
        self.lock(entity).await?;
        let previous = self.get_property(entity, key)?;
        self.record(Mutation::RemoveProperty {
            entity,
            key: key.to_string(),
        })?;
        Ok(previous)
    }

    pub async fn delete_relationship(&mut self, id: RelationshipId) -> Result<()> {
        self.ensure_open()?;
        self.lock(id.into()).await?;
        let (start, end) = self.endpoints(id)?;
        self.lock(start.into()).await?;
        self.lock(end.into()).await?;
        self.record(Mutation::DeleteRelationship { id })
    }

    /// Fails while the node still has relationships.
    pub async fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.ensure_open()?;
        self.lock(id.into()).await?;
        self.record(Mutation::DeleteNode { id })
    }

    pub fn get_property(&self, entity: EntityId, key: &str) -> Result<Option<PropertyValue>> {
        Ok(self
            .member
            .replica()
            .read(|graph| self.overlay.property(graph, entity, key))?)
    }

    pub fn property_keys(&self, entity: EntityId) -> Result<Vec<String>> {
        Ok(self
            .member
            .replica()
            .read(|graph| self.overlay.property_keys(graph, entity))?)
    }

    pub fn relationships(&self, node: NodeId, direction: Direction) -> Result<Vec<RelationshipId>> {
        Ok(self
            .member
            .replica()
            .read(|graph| self.overlay.relationships_of(graph, node, direction))?)
    }

    pub fn endpoints(&self, id: RelationshipId) -> Result<(NodeId, NodeId)> {
        Ok(self
            .member
            .replica()
            .read(|graph| self.overlay.endpoints(graph, id))?)
    }

    pub fn node_exists(&self, id: NodeId) -> bool {
        self.member
            .replica()
            .read(|graph| self.overlay.node_exists(graph, id))
    }

    pub fn mark_success(&mut self) {
        match self.state {
            TxState::Active => self.state = TxState::MarkedSuccess,
            TxState::MarkedFailed => {
                tracing::debug!(tx = %self.id, "Failed transaction stays failed");
            }
            _ => {}
        }
    }

    pub fn mark_failed(&mut self) {
        if !self.state.is_terminal() {
            self.state = TxState::MarkedFailed;
        }
    }

    /// Commit if marked successful, otherwise roll back. Locks are
    /// released either way.
    ///
    /// A commit the master accepted is never reported as a failure of the
    /// lock release that follows it. If this member cannot pull the entry
    /// afterwards, the result is [`ClusterError::CommittedNotVisible`]
    /// carrying the global id; the change is durable on the master and
    /// shows up locally with the next successful pull.
    pub async fn end(mut self) -> Result<Outcome> {
        let result = if self.state == TxState::MarkedSuccess {
            self.commit().await
        } else {
            Ok(Outcome::RolledBack)
        };
        if self.state != TxState::Committed {
            self.state = TxState::RolledBack;
            tracing::debug!(tx = %self.id, "Transaction rolled back");
        }
        if let Err(err) = self.release().await {
            if self.state != TxState::Committed {
                return Err(err);
            }
            tracing::warn!(tx = %self.id, error = %err, "Releasing locks after commit failed");
        }
        result
    }

    async fn commit(&mut self) -> Result<Outcome> {
        if self.overlay.is_empty() {
            self.state = TxState::Committed;
            return Ok(Outcome::Committed { global_id: None });
        }
        let change_set = std::mem::take(&mut self.overlay).into_change_set();
        let request = CommitRequest {
            tx: self.id,
            member: self.member.id(),
            change_set,
        };
        match self.member.broker().commit(request).await? {
            CommitResponse::Committed { global_id } => {
                self.state = TxState::Committed;
                // Visible locally before the locks go.
                if let Err(err) = self.member.catch_up(global_id).await {
                    tracing::warn!(tx = %self.id, %global_id, error = %err, "Catch-up after commit failed");
                    return Err(ClusterError::CommittedNotVisible {
                        tx: self.id,
                        global_id,
                        reason: err.to_string(),
                    });
                }
                Ok(Outcome::Committed {
                    global_id: Some(global_id),
                })
            }
            CommitResponse::Rejected { reason } => {
                Err(ClusterError::CommitConflict { tx: self.id, reason })
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        // Release on the master even with no locks recorded here: a grant
        // may have raced with a failed request.
        let result = self.member.broker().release_locks(self.id).await;
        self.locks.clear();
        result.map(|_| ())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        tracing::warn!(tx = %self.id, "Transaction dropped without end, rolling back");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let broker = self.member.broker().clone();
            let tx = self.id;
            runtime.spawn(async move {
                if let Err(err) = broker.release_locks(tx).await {
                    tracing::warn!(%tx, error = %err, "Releasing locks of dropped transaction failed");
                }
            });
        }
    }
}
