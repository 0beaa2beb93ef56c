//! Replicant Log: the master's globally ordered transaction history.
//!
//! Every committed change set becomes one immutable [`LogEntry`] with the
//! next global transaction id. Entries are chained by BLAKE3 content hash
//! so that a slave can check what it applies and a restarted master can
//! check what it replays.

pub mod error;
pub mod hash;
pub mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replicant_core::{ChangeSet, GlobalTxId, MemberId, TxId};

pub use error::{LogError, Result};
pub use log::TransactionLog;

/// One committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// Global transaction id, assigned by the master at commit.
    pub id: GlobalTxId,
    /// Member the transaction was started on.
    pub member: MemberId,
    /// Cluster-unique id of the committing transaction.
    pub tx: TxId,
    pub committed_at: DateTime<Utc>,
    pub change_set: ChangeSet,
    /// Content hash of the previous entry; `None` for the first entry.
    pub prev_hash: Option<String>,
    /// BLAKE3 content hash (hex) of this entry.
    pub content_hash: String,
}

impl LogEntry {
    /// Build a sealed entry: the content hash is computed from the other fields.
    pub fn seal(
        id: GlobalTxId,
        member: MemberId,
        tx: TxId,
        change_set: ChangeSet,
        prev_hash: Option<String>,
    ) -> Result<Self> {
        let mut entry = Self {
            id,
            member,
            tx,
            committed_at: Utc::now(),
            change_set,
            prev_hash,
            content_hash: String::new(),
        };
        entry.content_hash = hash::compute_entry_hash(&entry)?;
        Ok(entry)
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        match hash::compute_entry_hash(self) {
            Ok(computed) => computed == self.content_hash,
            Err(_) => false,
        }
    }
}
