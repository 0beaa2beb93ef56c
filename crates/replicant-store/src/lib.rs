//! Replicant Store: the per-member local graph.
//!
//! Every cluster member keeps its own copy of the graph in a [`MemoryGraph`].
//! The store offers plain CRUD and no concurrency control of its own; locking
//! and ordering are the cluster's job. Change sets are validated against the
//! store through an [`Overlay`] before they are applied, so application is
//! all-or-nothing.

pub mod apply;
pub mod error;
pub mod graph;
pub mod overlay;
pub mod snapshot;

pub use apply::{apply_change_set, validate_change_set};
pub use error::{Result, StoreError};
pub use graph::{GraphStore, MemoryGraph, Node, PropertyContainer, Relationship};
pub use overlay::Overlay;
pub use snapshot::Snapshot;
