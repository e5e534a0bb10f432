//! BVC Model
//!
//! Plain data types shared by the stores and the engine of the branch
//! version-control system.
//!
//! # Core Concepts
//!
//! - [`BranchPath`]: Hierarchical branch name (`MAIN/PROJECT-A/TASK-1`)
//! - [`Timepoint`]: Commit instant; [`Clock`] supplies "now"
//! - [`VersionedRecord<C>`]: One immutable version of an entity
//! - [`ContentComparable`]: What the engine needs to know about content
//! - [`BranchRecord`]: A branch's base, head, lock and tombstones
//! - [`BranchReview`] / [`MergeReview`]: Diffs between adjacent branches
//!
//! # Example
//!
//! ```rust
//! use bvc_model::{BranchPath, ContentComparable, FieldMap};
//!
//! let path: BranchPath = "MAIN/PROJECT-A".parse().unwrap();
//! assert_eq!(path.parent().unwrap().as_str(), "MAIN");
//!
//! let before = FieldMap::new().with("term", "Heart attack");
//! let after = FieldMap::new().with("term", "Myocardial infarction");
//! assert!(after.is_content_changed(&before));
//! ```

mod branch;
mod content;
mod hash;
mod path;
mod record;
mod review;
mod time;

pub use branch::{
    BranchLock, BranchRecord, BranchState, BranchTimespan, CommitType, LockToken, SyncState,
};
pub use content::{ContentComparable, FieldMap};
pub use hash::{ContentHash, HashError};
pub use path::{BranchPath, PathError};
pub use record::{BusinessId, VersionId, VersionedRecord};
pub use review::{
    BranchReview, ManuallyMergedEntity, MergeReview, MergeReviewId, ReviewChanges, ReviewId,
    ReviewStatus,
};
pub use time::{Clock, ManualClock, SystemClock, Timepoint};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn record_on_child_branch() {
        let path: BranchPath = "MAIN/A".parse().unwrap();
        let content = FieldMap::new().with("term", "Heart attack");
        let record = VersionedRecord::new(
            BusinessId::new("22298006"),
            path.clone(),
            Timepoint::from_millis(115),
            content.clone(),
        );
        assert_eq!(record.origin.parent().unwrap().as_str(), "MAIN");
        assert_eq!(record.content.content_hash(), content.content_hash());
    }

    #[test]
    fn branch_state_round_trips_through_json() {
        let branch = BranchRecord::new(
            "MAIN/A".parse().unwrap(),
            Timepoint::from_millis(105),
            Timepoint::from_millis(100),
        );
        let json = serde_json::to_string(&branch.state()).unwrap();
        let back: BranchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, branch.state());
    }
}
