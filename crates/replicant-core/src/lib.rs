//! replicant-core: Shared types for the Replicant replicated graph cluster.
//!
//! This crate provides the foundational types used across all Replicant components:
//! - Identifiers for nodes, relationships, members, and transactions
//! - Property values stored on nodes and relationships
//! - Mutation records and the change sets built from them
//! - Member roles and transaction states

pub mod mutation;
pub mod types;

pub use mutation::{ChangeSet, Mutation};
pub use types::{
    Direction, EntityId, EntityKind, GlobalTxId, MemberId, NodeId, PropertyValue, RelationshipId,
    ResourceId, Role, StoreId, TxId, TxState, REFERENCE_NODE,
};
