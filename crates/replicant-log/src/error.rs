//! Error types for the replicant-log crate.

use replicant_core::GlobalTxId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Replication gap: entries after {requested} requested, log starts at {first_available}")]
    ReplicationGap {
        requested: GlobalTxId,
        first_available: GlobalTxId,
    },

    #[error("Transaction log corrupt at entry {id}: {reason}")]
    Corrupt { id: GlobalTxId, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LogError>;
