//! Error types for the replicant-cluster crate.

use replicant_core::{GlobalTxId, MemberId, ResourceId, StoreId, TxId, TxState};
use replicant_log::LogError;
use replicant_store::StoreError;
use replicant_verify::VerifyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Deadlock detected: {tx} cannot wait for {resource}")]
    DeadlockDetected { tx: TxId, resource: ResourceId },

    #[error("Commit of {tx} rejected: {reason}")]
    CommitConflict { tx: TxId, reason: String },

    #[error("Replication gap: entries after {requested} requested, master log starts at {first_available}")]
    ReplicationGap {
        requested: GlobalTxId,
        first_available: GlobalTxId,
    },

    #[error("Log entry {got} out of order, expected {expected}")]
    OutOfOrder {
        expected: GlobalTxId,
        got: GlobalTxId,
    },

    #[error("Log entry {0} failed integrity check")]
    IntegrityViolation(GlobalTxId),

    #[error("Transaction {tx} committed as {global_id} but is not visible locally yet: {reason}")]
    CommittedNotVisible {
        tx: TxId,
        global_id: GlobalTxId,
        reason: String,
    },

    #[error("Transaction {tx} is not active (state {state:?})")]
    NotActive { tx: TxId, state: TxState },

    #[error("Lock wait for {resource} by {tx} was abandoned")]
    LockWaitAborted { tx: TxId, resource: ResourceId },

    #[error("Store {found} of member {member} does not belong to cluster store {expected}")]
    StoreMismatch {
        member: MemberId,
        expected: StoreId,
        found: StoreId,
    },

    #[error("Cluster already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("Scenario needs {required} slaves, cluster has {available}")]
    NotEnoughSlaves { required: usize, available: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Log error: {0}")]
    Log(LogError),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Deadlocks are reported distinctly so callers can retry with a fresh transaction.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, ClusterError::DeadlockDetected { .. })
    }
}

impl From<LogError> for ClusterError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::ReplicationGap {
                requested,
                first_available,
            } => ClusterError::ReplicationGap {
                requested,
                first_available,
            },
            other => ClusterError::Log(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
