//! Error types for the version-control engine
//!
//! Errors fall into three groups:
//! - Expected contention and ordering failures callers recover from
//!   (`BranchLocked`, `RebaseRequired`, `StaleReview`, `UnresolvedConflicts`)
//! - Caller mistakes (unknown branches, wrong branch pairs, bad input)
//! - Corruption (`VisibilityInvariantViolation`, `AncestryTooDeep`), which
//!   is logged at error level where detected and never swallowed

use bvc_merge::MergeError;
use bvc_model::{
    BranchPath, BusinessId, CommitType, MergeReviewId, PathError, ReviewId, ReviewStatus,
    Timepoint, VersionId,
};
use bvc_store::StoreError;

use crate::jobs::MergeJobId;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum VcError {
    /// Another commit holds the branch lock
    #[error("branch {path} is locked")]
    BranchLocked {
        /// Contended branch
        path: BranchPath,
    },

    /// Promotion of a child that has not seen its parent's head
    #[error("branch {child} must be rebased first: base {child_base} != parent head {parent_head}")]
    RebaseRequired {
        /// Child branch
        child: BranchPath,
        /// Child base
        child_base: Timepoint,
        /// Parent head
        parent_head: Timepoint,
    },

    /// Review snapshot no longer matches the live branches
    #[error("review {id} is stale")]
    StaleReview {
        /// Review or merge review id
        id: String,
    },

    /// Conflicts without an automatic or manual resolution
    #[error("unresolved conflicts: {}", join_ids(.ids))]
    UnresolvedConflicts {
        /// Unresolved business ids, sorted
        ids: Vec<BusinessId>,
    },

    /// Two versions of one entity resolved on a branch
    #[error("visibility invariant violated on {path}: {business_id} resolves to both {first} and {second}")]
    VisibilityInvariantViolation {
        /// Branch being resolved
        path: BranchPath,
        /// Entity with two visible versions
        business_id: BusinessId,
        /// Version admitted first
        first: VersionId,
        /// Colliding version
        second: VersionId,
    },

    /// Record writes of a commit failed and were rolled back
    #[error("commit at {timepoint} on {path} failed to write: {source}")]
    WriteFailed {
        /// Branch of the commit
        path: BranchPath,
        /// Commit timepoint
        timepoint: Timepoint,
        /// Store failure
        #[source]
        source: StoreError,
    },

    /// No branch at this path
    #[error("branch not found: {path}")]
    BranchNotFound {
        /// Missing branch
        path: BranchPath,
    },

    /// Branch did not exist yet at the requested timepoint
    #[error("branch {path} has no history at {timepoint}")]
    BranchNotFoundAt {
        /// Branch
        path: BranchPath,
        /// Requested timepoint
        timepoint: Timepoint,
    },

    /// Path already taken
    #[error("branch already exists: {path}")]
    BranchExists {
        /// Existing branch
        path: BranchPath,
    },

    /// Branches are not a direct parent/child pair in the required direction
    #[error("{source_path} and {target_path} are not a parent/child pair for this operation")]
    NotParentChild {
        /// Source branch
        source_path: BranchPath,
        /// Target branch
        target_path: BranchPath,
    },

    /// Rebase or promotion commit opened without its counterpart branch
    #[error("{commit_type} commit on {path} needs a source branch")]
    MissingSource {
        /// Branch the commit was opened on
        path: BranchPath,
        /// Commit kind
        commit_type: CommitType,
    },

    /// Operation does not apply to a root branch
    #[error("operation not applicable to root branch {path}")]
    RootBranch {
        /// Root branch
        path: BranchPath,
    },

    /// Unknown branch review
    #[error("review not found: {0}")]
    ReviewNotFound(ReviewId),

    /// Unknown merge review
    #[error("merge review not found: {0}")]
    MergeReviewNotFound(MergeReviewId),

    /// Unknown merge job
    #[error("merge job not found: {0}")]
    MergeJobNotFound(MergeJobId),

    /// Review is not in a usable state
    #[error("review {id} is {status}, expected CURRENT")]
    ReviewNotCurrent {
        /// Review or merge review id
        id: String,
        /// Actual status
        status: ReviewStatus,
    },

    /// Manual merges supplied for ids that are not in conflict
    #[error("manual merges for non-conflicting ids: {}", join_ids(.ids))]
    UnexpectedManualMerge {
        /// Offending business ids, sorted
        ids: Vec<BusinessId>,
    },

    /// Manual merge snapshot does not decode as record content
    #[error("invalid snapshot for {business_id}: {source}")]
    InvalidSnapshot {
        /// Entity
        business_id: BusinessId,
        /// Decode failure
        #[source]
        source: serde_json::Error,
    },

    /// Commit lock vanished or changed hands before completion
    #[error("lock for commit {timepoint} on {path} was lost")]
    LockLost {
        /// Branch
        path: BranchPath,
        /// Commit timepoint
        timepoint: Timepoint,
    },

    /// Only the head commit of a branch can be rolled back
    #[error("commit {timepoint} is not the latest on {path} (head {head})")]
    NotLatestCommit {
        /// Branch
        path: BranchPath,
        /// Requested commit
        timepoint: Timepoint,
        /// Current head
        head: Timepoint,
    },

    /// Ancestor walk exceeded the configured bound
    #[error("ancestry of {path} exceeds {max_depth} levels")]
    AncestryTooDeep {
        /// Branch being resolved
        path: BranchPath,
        /// Configured bound
        max_depth: usize,
    },

    /// Cancelled through a cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Background task could not be spawned or did not finish
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// Invalid branch path
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Merge strategy lookup failed
    #[error("merge strategy error: {0}")]
    Merge(#[from] MergeError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Store failure outside a commit write
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl VcError {
    /// Check if the same call may succeed after backing off
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BranchLocked { .. })
            || matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// Check if the caller can recover by taking a corrective step
    /// (retry, rebase, recreate a review, supply merges)
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_retryable()
            || matches!(
                self,
                Self::RebaseRequired { .. }
                    | Self::StaleReview { .. }
                    | Self::UnresolvedConflicts { .. }
            )
    }

    /// Check if the error indicates corrupted bookkeeping
    #[inline]
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::VisibilityInvariantViolation { .. } | Self::AncestryTooDeep { .. }
        )
    }
}

fn join_ids(ids: &[BusinessId]) -> String {
    ids.iter()
        .map(BusinessId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Engine result alias
pub type VcResult<T> = Result<T, VcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_conflicts_lists_ids() {
        let err = VcError::UnresolvedConflicts {
            ids: vec!["A".into(), "B".into()],
        };
        assert_eq!(err.to_string(), "unresolved conflicts: A, B");
        assert!(err.is_recoverable());
        assert!(!err.is_retryable());
    }

    #[test]
    fn lock_contention_is_retryable() {
        let err = VcError::BranchLocked {
            path: "MAIN".parse().unwrap(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_corruption());

        let race = VcError::Store(StoreError::RevisionMismatch {
            path: "MAIN".parse().unwrap(),
            expected: 1,
            actual: 2,
        });
        assert!(race.is_retryable());
    }

    #[test]
    fn invariant_violation_is_corruption() {
        let err = VcError::VisibilityInvariantViolation {
            path: "MAIN/A".parse().unwrap(),
            business_id: "X".into(),
            first: VersionId::new(),
            second: VersionId::new(),
        };
        assert!(err.is_corruption());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn path_errors_convert() {
        let err: VcError = bvc_model::BranchPath::new("").unwrap_err().into();
        assert!(matches!(err, VcError::InvalidPath(PathError::Empty)));
    }
}
