//! Store error types

use bvc_model::{BranchPath, Timepoint, VersionId};

/// Errors returned by store implementations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Lookup key has no entry
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Key that was looked up
        key: String,
    },

    /// Insert would overwrite an existing entry
    #[error("{kind} already exists: {key}")]
    AlreadyExists {
        /// Entity kind
        kind: &'static str,
        /// Conflicting key
        key: String,
    },

    /// Conditional write lost a race
    #[error("revision mismatch on branch {path}: expected {expected}, found {actual}")]
    RevisionMismatch {
        /// Branch being written
        path: BranchPath,
        /// Revision the caller read
        expected: u64,
        /// Revision currently stored
        actual: u64,
    },

    /// Branch head may only move forward
    #[error("head of branch {path} cannot move from {head} back to {proposed}")]
    HeadRegression {
        /// Branch being written
        path: BranchPath,
        /// Stored head
        head: Timepoint,
        /// Rejected head
        proposed: Timepoint,
    },

    /// Only the creation timespan is left
    #[error("branch {path} has no earlier timespan to return to")]
    NoEarlierTimespan {
        /// Branch being reverted
        path: BranchPath,
    },

    /// Version was already superseded
    #[error("version {0} is already ended")]
    AlreadyEnded(VersionId),

    /// Backend failure
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`]
    #[must_use]
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::RevisionMismatch { .. })
    }
}
