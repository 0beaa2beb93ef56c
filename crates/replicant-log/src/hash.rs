//! BLAKE3 content hashing for log entries.
//!
//! Computes a deterministic hash of all entry fields (excluding the
//! content_hash itself). Because `prev_hash` is covered, each entry also
//! commits to the whole history before it.

use serde::Serialize;

use replicant_core::{ChangeSet, GlobalTxId, MemberId, TxId};

use crate::LogEntry;

/// Hashable representation of a LogEntry (excludes content_hash).
#[derive(Serialize)]
struct HashableEntry<'a> {
    id: &'a GlobalTxId,
    member: &'a MemberId,
    tx: &'a TxId,
    committed_at: &'a chrono::DateTime<chrono::Utc>,
    change_set: &'a ChangeSet,
    prev_hash: &'a Option<String>,
}

/// Compute the BLAKE3 hash of an entry's content. Returns the hex-encoded hash.
pub fn compute_entry_hash(entry: &LogEntry) -> Result<String, serde_json::Error> {
    let hashable = HashableEntry {
        id: &entry.id,
        member: &entry.member,
        tx: &entry.tx,
        committed_at: &entry.committed_at,
        change_set: &entry.change_set,
        prev_hash: &entry.prev_hash,
    };

    let json = serde_json::to_vec(&hashable)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}
