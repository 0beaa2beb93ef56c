//! Core domain types for the Replicant cluster.
//!
//! Identifiers are plain integers assigned by the master. The only
//! randomly generated identifier is the [`StoreId`], which ties a slave's
//! store to the master store it was seeded from.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Store ─────────────────────────────────────────────────────────

/// Identity of a cluster's data set. Slaves seeded from a master share its id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StoreId(pub Uuid);

impl StoreId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Graph Entities ────────────────────────────────────────────────

/// Identifier of a node. Assigned only by the master.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct NodeId(pub u64);

/// Identifier of a relationship. Assigned only by the master.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct RelationshipId(pub u64);

/// The node every fresh store starts with.
pub const REFERENCE_NODE: NodeId = NodeId(0);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either kind of property container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityId {
    Node(NodeId),
    Relationship(RelationshipId),
}

/// Lockable resources are exactly the graph entities.
pub type ResourceId = EntityId;

impl EntityId {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityId::Node(_) => EntityKind::Node,
            EntityId::Relationship(_) => EntityKind::Relationship,
        }
    }
}

impl From<NodeId> for EntityId {
    fn from(id: NodeId) -> Self {
        EntityId::Node(id)
    }
}

impl From<RelationshipId> for EntityId {
    fn from(id: RelationshipId) -> Self {
        EntityId::Relationship(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Node(id) => write!(f, "Node[{id}]"),
            EntityId::Relationship(id) => write!(f, "Relationship[{id}]"),
        }
    }
}

/// Which id space an allocation request draws from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Relationship,
}

/// Relationship direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

// ── Property Values ───────────────────────────────────────────────

/// A value stored under a property key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    IntArray(Vec<i64>),
    StringArray(Vec<String>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v:?}"),
            PropertyValue::IntArray(v) => write!(f, "{v:?}"),
            PropertyValue::StringArray(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// Identifier of a cluster member. The master is always member 0.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct MemberId(pub u32);

impl MemberId {
    pub const MASTER: MemberId = MemberId(0);
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Slave,
}

// ── Transactions ──────────────────────────────────────────────────

/// Cluster-unique transaction identifier: the starting member plus a
/// member-local counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId {
    pub member: MemberId,
    pub local: u64,
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}@{}", self.local, self.member)
    }
}

/// Position in the master's globally ordered transaction log. Id 0 means
/// "nothing applied yet"; the first committed transaction is 1.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct GlobalTxId(pub u64);

impl GlobalTxId {
    pub const ZERO: GlobalTxId = GlobalTxId(0);

    pub fn next(self) -> Self {
        GlobalTxId(self.0 + 1)
    }
}

impl fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Active,
    MarkedSuccess,
    MarkedFailed,
    Committed,
    RolledBack,
}

impl TxState {
    /// Committed and RolledBack are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack)
    }
}
