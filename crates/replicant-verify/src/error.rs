//! Error types for the replicant-verify crate.

use std::path::PathBuf;

use replicant_core::StoreId;
use replicant_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("Property mismatch: {0}")]
    PropertyMismatch(String),

    #[error("Member {index}: {source}")]
    Member {
        index: usize,
        #[source]
        source: Box<VerifyError>,
    },

    #[error("Store at {path} belongs to {found}, expected {expected}")]
    ForeignStore {
        path: PathBuf,
        expected: StoreId,
        found: StoreId,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VerifyError {
    /// Index of the failing member when checking several, if known.
    pub fn member_index(&self) -> Option<usize> {
        match self {
            VerifyError::Member { index, .. } => Some(*index),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
