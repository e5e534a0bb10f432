//! Review records
//!
//! A [`BranchReview`] lists what would change if one branch's view were
//! carried to an adjacent branch. A [`MergeReview`] pairs the two reviews
//! of a parent/child pair so conflicts can be resolved before a rebase.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::branch::BranchState;
use crate::path::BranchPath;
use crate::record::BusinessId;
use crate::time::Timepoint;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Fresh identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

ulid_id!(
    /// Branch review identifier
    ReviewId,
    "review"
);
ulid_id!(
    /// Merge review identifier
    MergeReviewId,
    "merge-review"
);

/// Lifecycle of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    /// Computation not finished
    Pending,
    /// Computed and both branches unchanged since
    Current,
    /// A branch moved after the snapshot was taken
    Stale,
    /// Computation failed or was cancelled
    Failed,
}

impl Display for ReviewStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Current => "CURRENT",
            Self::Stale => "STALE",
            Self::Failed => "FAILED",
        })
    }
}

/// Business ids classified by how the target would change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewChanges {
    /// Visible on source only
    pub new: BTreeSet<BusinessId>,
    /// Visible on both with different versions and content
    pub changed: BTreeSet<BusinessId>,
    /// Visible on target only
    pub deleted: BTreeSet<BusinessId>,
}

impl ReviewChanges {
    /// Whether nothing would change
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Every id in any category
    #[must_use]
    pub fn all(&self) -> BTreeSet<BusinessId> {
        self.new
            .iter()
            .chain(&self.changed)
            .chain(&self.deleted)
            .cloned()
            .collect()
    }
}

/// One-directional diff between adjacent branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReview {
    /// Identifier
    pub id: ReviewId,
    /// Last status change
    pub last_updated: Timepoint,
    /// Lifecycle status
    pub status: ReviewStatus,
    /// Source snapshot
    pub source: BranchState,
    /// Target snapshot
    pub target: BranchState,
    /// Whether the source is the target's parent (rebase direction)
    pub source_is_parent: bool,
    /// Classified changes, once computed
    pub changes: Option<ReviewChanges>,
    /// Failure or status detail
    pub message: Option<String>,
}

impl BranchReview {
    /// Freshly created, not yet computed
    #[must_use]
    pub fn pending(
        source: BranchState,
        target: BranchState,
        source_is_parent: bool,
        now: Timepoint,
    ) -> Self {
        Self {
            id: ReviewId::new(),
            last_updated: now,
            status: ReviewStatus::Pending,
            source,
            target,
            source_is_parent,
            changes: None,
            message: None,
        }
    }

    /// Changed ids, or empty when not computed
    #[must_use]
    pub fn changed_ids(&self) -> BTreeSet<BusinessId> {
        self.changes
            .as_ref()
            .map(ReviewChanges::all)
            .unwrap_or_default()
    }
}

/// Paired reviews of a parent (source) and child (target)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReview {
    /// Identifier
    pub id: MergeReviewId,
    /// Parent branch
    pub source_path: BranchPath,
    /// Child branch
    pub target_path: BranchPath,
    /// Review of parent into child
    pub source_to_target: ReviewId,
    /// Review of child into parent
    pub target_to_source: ReviewId,
    /// Derived from the two branch reviews
    pub status: ReviewStatus,
    /// Failure or status detail
    pub message: Option<String>,
    /// Creation timepoint
    pub created: Timepoint,
    /// Timepoint of the rebase that applied this review
    pub applied: Option<Timepoint>,
}

/// Human resolution of one conflicting entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManuallyMergedEntity {
    /// Merge review the resolution belongs to
    pub merge_review_id: MergeReviewId,
    /// Conflicting entity
    pub business_id: BusinessId,
    /// Resolved content, serialized; ignored when `deleted`
    pub snapshot: serde_json::Value,
    /// Resolve by deleting the entity on the child
    pub deleted: bool,
}
