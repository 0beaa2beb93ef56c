//! Replicant Verify: checks that replicas hold what the master holds.
//!
//! Comparison runs over any pair of [`GraphStore`]s, so the same check
//! serves a live cluster and a set of data directories after a restart.
//!
//! [`GraphStore`]: replicant_store::GraphStore

pub mod compare;
pub mod digest;
pub mod error;
pub mod offline;

use serde::{Deserialize, Serialize};

pub use compare::ConsistencyVerifier;
pub use digest::graph_digest;
pub use error::{Result, VerifyError};

/// What a successful verification covered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub members_checked: usize,
    pub nodes_checked: usize,
    pub relationships_checked: usize,
    pub properties_checked: usize,
    /// Digest of the whole reference graph.
    pub reference_digest: String,
}

impl VerificationReport {
    fn absorb(&mut self, other: &VerificationReport) {
        self.members_checked += other.members_checked;
        self.nodes_checked += other.nodes_checked;
        self.relationships_checked += other.relationships_checked;
        self.properties_checked += other.properties_checked;
    }
}
