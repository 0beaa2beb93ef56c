//! Request and response shapes exchanged between members and the master.
//!
//! These are transport-neutral: the in-process broker passes them by value,
//! and they serialize cleanly should a real transport be added.

use serde::{Deserialize, Serialize};

use replicant_core::{ChangeSet, GlobalTxId, MemberId, ResourceId, StoreId, TxId};
use replicant_log::LogEntry;

/// Only exclusive locks are modeled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    #[default]
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRequest {
    pub resource: ResourceId,
    pub tx: TxId,
    #[serde(default)]
    pub mode: LockMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockResponse {
    Granted,
    Deadlock,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRequest {
    /// Also the idempotency key: a retried request commits at most once.
    pub tx: TxId,
    pub member: MemberId,
    pub change_set: ChangeSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitResponse {
    Committed { global_id: GlobalTxId },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub since: GlobalTxId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullResponse {
    /// Ascending, gap-free.
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    /// Set when a member rejoins after a restart.
    pub member: Option<MemberId>,
    pub store_id: StoreId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinResponse {
    pub member: MemberId,
    /// First local transaction counter the member may use.
    pub next_local_tx: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_core::NodeId;

    #[test]
    fn lock_request_defaults_to_write_mode() {
        let json = r#"{"resource":{"kind":"node","id":3},"tx":{"member":1,"local":2}}"#;
        let req: LockRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.mode, LockMode::Write);
        assert_eq!(req.resource, ResourceId::Node(NodeId(3)));
    }

    #[test]
    fn commit_response_is_tagged() {
        let json = serde_json::to_string(&CommitResponse::Rejected {
            reason: "Node not found: 4".into(),
        })
        .unwrap();
        assert!(json.contains(r#""status":"rejected""#));
    }
}
