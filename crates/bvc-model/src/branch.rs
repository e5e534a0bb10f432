//! Branch records
//!
//! A branch is a named, time-ordered line of changes layered over its
//! parent. Its view is defined by two timepoints:
//!
//! - `base`: the parent timepoint this branch currently sees
//! - `head`: the last committed timepoint on this branch
//!
//! Every time `head` moves, a new [`BranchTimespan`] begins so that past
//! views can be reconstructed with the `base` and tombstones in force at
//! that time.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::path::BranchPath;
use crate::record::VersionId;
use crate::time::Timepoint;

/// Kind of commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitType {
    /// Ordinary content edit on one branch
    Content,
    /// Moves a child's base up to its parent's head
    Rebase,
    /// Publishes a child's changes into its parent
    Promotion,
}

impl Display for CommitType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Content => "CONTENT",
            Self::Rebase => "REBASE",
            Self::Promotion => "PROMOTION",
        })
    }
}

/// Identity of one lock acquisition
///
/// Two locks taken at the same timepoint (for example before and after an
/// administrative unlock) still carry different tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(Ulid);

impl LockToken {
    /// Fresh token
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for LockToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "lock-{}", self.0)
    }
}

/// Exclusive write lock held by an open commit or maintenance task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchLock {
    /// Identity of this acquisition
    pub token: LockToken,
    /// Timepoint of the commit holding the lock
    pub timepoint: Timepoint,
    /// Commit kind, or `None` for maintenance work
    pub commit_type: Option<CommitType>,
    /// Free text shown to operators
    pub description: String,
}

impl BranchLock {
    /// Lock held on behalf of a commit
    #[must_use]
    pub fn for_commit(timepoint: Timepoint, commit_type: CommitType, branch: &BranchPath) -> Self {
        Self {
            token: LockToken::new(),
            timepoint,
            commit_type: Some(commit_type),
            description: format!("{commit_type} commit on {branch} at {timepoint}"),
        }
    }

    /// Lock held for maintenance
    #[must_use]
    pub fn maintenance(timepoint: Timepoint, description: impl Into<String>) -> Self {
        Self {
            token: LockToken::new(),
            timepoint,
            commit_type: None,
            description: description.into(),
        }
    }
}

/// Current state of a branch
///
/// # Invariants
/// - `base <= head` for every branch that has been rebased or promoted;
///   a freshly created child starts with `base` equal to its parent's head
/// - `tombstones` is always empty on a root branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Branch name
    pub path: BranchPath,
    /// Creation timepoint
    pub created: Timepoint,
    /// Parent timepoint this branch sees
    pub base: Timepoint,
    /// Last committed timepoint
    pub head: Timepoint,
    /// Timepoint of the last promotion into this branch
    pub last_promotion: Option<Timepoint>,
    /// Lock held by an open commit
    pub lock: Option<BranchLock>,
    /// Whether the branch carries changes not yet promoted
    pub contains_content: bool,
    /// Inherited version ids this branch has replaced or deleted
    pub tombstones: BTreeSet<VersionId>,
    /// Timepoint of the last forcibly removed lock; later commits are
    /// stamped strictly after it
    #[serde(default)]
    pub fence: Option<Timepoint>,
}

impl BranchRecord {
    /// New branch whose view starts at `base`
    #[must_use]
    pub fn new(path: BranchPath, created: Timepoint, base: Timepoint) -> Self {
        Self {
            path,
            created,
            base,
            head: created,
            last_promotion: None,
            lock: None,
            contains_content: false,
            tombstones: BTreeSet::new(),
            fence: None,
        }
    }

    /// Whether a commit currently holds the lock
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Whether `held` is still the lock on this branch
    #[inline]
    #[must_use]
    pub fn is_locked_by(&self, held: &BranchLock) -> bool {
        self.lock.as_ref().is_some_and(|l| l.token == held.token)
    }

    /// Timepoint for the next commit: `max(now, head + 1, fence + 1)`
    #[must_use]
    pub fn next_timepoint(&self, now: Timepoint) -> Timepoint {
        let next = now.max(self.head.next());
        match self.fence {
            Some(fence) => next.max(fence.next()),
            None => next,
        }
    }

    /// Snapshot used by reviews to detect staleness
    #[must_use]
    pub fn state(&self) -> BranchState {
        BranchState {
            path: self.path.clone(),
            base: self.base,
            head: self.head,
        }
    }

    /// Open timespan reflecting the current view
    #[must_use]
    pub fn timespan(&self) -> BranchTimespan {
        BranchTimespan {
            start: self.head,
            end: None,
            base: self.base,
            head: self.head,
            tombstones: self.tombstones.clone(),
            contains_content: self.contains_content,
            last_promotion: self.last_promotion,
        }
    }

    /// Return to the view recorded in `span`
    ///
    /// Lock and fence are left as they are.
    pub fn restore(&mut self, span: &BranchTimespan) {
        self.base = span.base;
        self.head = span.head;
        self.tombstones.clone_from(&span.tombstones);
        self.contains_content = span.contains_content;
        self.last_promotion = span.last_promotion;
    }

    /// Relationship to the parent's head
    #[must_use]
    pub fn sync_state(&self, parent_head: Timepoint) -> SyncState {
        SyncState::classify(self.base == parent_head, self.contains_content)
    }
}

/// View of a branch valid over `[start, end)`
///
/// `start` always equals `head`: a new timespan opens exactly when a commit
/// moves the head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTimespan {
    /// First instant of validity
    pub start: Timepoint,
    /// First instant no longer covered, if superseded
    pub end: Option<Timepoint>,
    /// Parent timepoint seen during the span
    pub base: Timepoint,
    /// Branch head during the span
    pub head: Timepoint,
    /// Tombstones in force during the span
    pub tombstones: BTreeSet<VersionId>,
    /// Whether the branch had unpromoted changes
    #[serde(default)]
    pub contains_content: bool,
    /// Last promotion into the branch as of the span
    #[serde(default)]
    pub last_promotion: Option<Timepoint>,
}

impl BranchTimespan {
    /// Whether `at` falls within the span
    #[inline]
    #[must_use]
    pub fn covers(&self, at: Timepoint) -> bool {
        self.start <= at && self.end.map_or(true, |end| at < end)
    }
}

/// `(path, base, head)` triple captured by reviews
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchState {
    /// Branch name
    pub path: BranchPath,
    /// Base at capture time
    pub base: Timepoint,
    /// Head at capture time
    pub head: Timepoint,
}

impl BranchState {
    /// Whether `branch` has moved since this snapshot
    #[must_use]
    pub fn is_outdated_by(&self, branch: &BranchRecord) -> bool {
        self.path != branch.path || self.base != branch.base || self.head != branch.head
    }
}

/// Position of a child relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Rebased and nothing to promote
    UpToDate,
    /// Rebased with changes ready to promote
    Forward,
    /// Parent moved on and the child has no changes
    Behind,
    /// Parent moved on and the child has changes
    Diverged,
}

impl SyncState {
    /// Classify from "is rebased" and "has content"
    #[must_use]
    pub const fn classify(rebased: bool, contains_content: bool) -> Self {
        match (rebased, contains_content) {
            (true, false) => Self::UpToDate,
            (true, true) => Self::Forward,
            (false, false) => Self::Behind,
            (false, true) => Self::Diverged,
        }
    }
}
