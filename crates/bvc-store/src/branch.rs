//! Branch persistence
//!
//! [`BranchStore`] holds the current [`BranchRecord`] of every branch plus
//! its timespan history. Writes are conditional on a [`Revision`] so that
//! lock acquisition and head advancement are atomic check-then-set
//! operations, correct even when several engine instances share a store.

use std::fmt::Debug;

use bvc_model::{BranchPath, BranchRecord, BranchTimespan, Timepoint};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::StoreError;

/// Monotonic write counter of a branch record (ETag)
pub type Revision = u64;

/// A value paired with the revision it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Revision of the stored record
    pub revision: Revision,
    /// The record
    pub value: T,
}

/// Durable branch metadata
///
/// # Timespans
/// Implementations must open a new timespan whenever a write moves `head`
/// and close the previous one at the new head. Writes that leave `head`
/// unchanged update the open timespan in place.
pub trait BranchStore: Send + Sync + Debug {
    /// Insert a new branch
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`] if the path is taken
    fn insert(&self, branch: BranchRecord) -> Result<Versioned<BranchRecord>, StoreError>;

    /// Current record of a branch
    ///
    /// # Errors
    /// Backend failures only; a missing branch is `Ok(None)`
    fn get(&self, path: &BranchPath) -> Result<Option<Versioned<BranchRecord>>, StoreError>;

    /// Replace a branch record if its revision still equals `expected`
    ///
    /// # Errors
    /// - [`StoreError::RevisionMismatch`] if another write got there first
    /// - [`StoreError::HeadRegression`] if `next.head` is behind the stored head
    /// - [`StoreError::NotFound`] if the branch does not exist
    fn compare_and_set(
        &self,
        expected: Revision,
        next: BranchRecord,
    ) -> Result<Versioned<BranchRecord>, StoreError>;

    /// Drop the open timespan and return the branch to the one before it
    ///
    /// The previous timespan is reopened and the record's view (`base`,
    /// `head`, tombstones, content flags) is restored from it. Lock and
    /// fence are untouched.
    ///
    /// # Errors
    /// - [`StoreError::RevisionMismatch`] if another write got there first
    /// - [`StoreError::NoEarlierTimespan`] if the branch has a single timespan
    /// - [`StoreError::NotFound`] if the branch does not exist
    fn revert_head(
        &self,
        path: &BranchPath,
        expected: Revision,
    ) -> Result<Versioned<BranchRecord>, StoreError>;

    /// Timespan in force at `at`
    ///
    /// # Errors
    /// Backend failures only; `Ok(None)` if the branch did not exist yet
    fn timespan_at(
        &self,
        path: &BranchPath,
        at: Timepoint,
    ) -> Result<Option<BranchTimespan>, StoreError>;

    /// Full history of a branch, oldest first
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if the branch does not exist
    fn timespans(&self, path: &BranchPath) -> Result<Vec<BranchTimespan>, StoreError>;

    /// All branches in path order
    ///
    /// # Errors
    /// Backend failures only
    fn list(&self) -> Result<Vec<BranchRecord>, StoreError>;

    /// Direct children of `path`, in path order
    ///
    /// # Errors
    /// Backend failures only
    fn children(&self, path: &BranchPath) -> Result<Vec<BranchRecord>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|b| path.is_parent_of(&b.path))
            .collect())
    }
}

#[derive(Debug)]
struct BranchEntry {
    revision: Revision,
    record: BranchRecord,
    history: Vec<BranchTimespan>,
}

/// In-memory [`BranchStore`] on a sharded concurrent map
///
/// Conditional writes hold the shard's write guard across check and set,
/// which gives the same atomicity a document store's `If-Match` write does.
#[derive(Debug, Default)]
pub struct MemoryBranchStore {
    branches: DashMap<BranchPath, BranchEntry>,
}

impl MemoryBranchStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of branches
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether no branches exist
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl BranchStore for MemoryBranchStore {
    fn insert(&self, branch: BranchRecord) -> Result<Versioned<BranchRecord>, StoreError> {
        match self.branches.entry(branch.path.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: "branch",
                key: branch.path.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(BranchEntry {
                    revision: 1,
                    history: vec![branch.timespan()],
                    record: branch.clone(),
                });
                Ok(Versioned {
                    revision: 1,
                    value: branch,
                })
            }
        }
    }

    fn get(&self, path: &BranchPath) -> Result<Option<Versioned<BranchRecord>>, StoreError> {
        Ok(self.branches.get(path).map(|entry| Versioned {
            revision: entry.revision,
            value: entry.record.clone(),
        }))
    }

    fn compare_and_set(
        &self,
        expected: Revision,
        next: BranchRecord,
    ) -> Result<Versioned<BranchRecord>, StoreError> {
        let mut entry = self
            .branches
            .get_mut(&next.path)
            .ok_or_else(|| StoreError::not_found("branch", &next.path))?;

        if entry.revision != expected {
            return Err(StoreError::RevisionMismatch {
                path: next.path,
                expected,
                actual: entry.revision,
            });
        }
        if next.head < entry.record.head {
            return Err(StoreError::HeadRegression {
                path: next.path,
                head: entry.record.head,
                proposed: next.head,
            });
        }

        if next.head == entry.record.head {
            if let Some(open) = entry.history.last_mut() {
                *open = next.timespan();
            }
        } else {
            if let Some(open) = entry.history.last_mut() {
                open.end = Some(next.head);
            }
            entry.history.push(next.timespan());
        }

        entry.revision += 1;
        entry.record = next.clone();
        Ok(Versioned {
            revision: entry.revision,
            value: next,
        })
    }

    fn revert_head(
        &self,
        path: &BranchPath,
        expected: Revision,
    ) -> Result<Versioned<BranchRecord>, StoreError> {
        let mut entry = self
            .branches
            .get_mut(path)
            .ok_or_else(|| StoreError::not_found("branch", path))?;

        if entry.revision != expected {
            return Err(StoreError::RevisionMismatch {
                path: path.clone(),
                expected,
                actual: entry.revision,
            });
        }
        if entry.history.len() < 2 {
            return Err(StoreError::NoEarlierTimespan { path: path.clone() });
        }

        entry.history.pop();
        let mut record = entry.record.clone();
        if let Some(previous) = entry.history.last_mut() {
            previous.end = None;
            record.restore(previous);
        }
        entry.revision += 1;
        entry.record = record.clone();
        Ok(Versioned {
            revision: entry.revision,
            value: record,
        })
    }

    fn timespan_at(
        &self,
        path: &BranchPath,
        at: Timepoint,
    ) -> Result<Option<BranchTimespan>, StoreError> {
        Ok(self.branches.get(path).and_then(|entry| {
            entry
                .history
                .iter()
                .rev()
                .find(|span| span.start <= at)
                .cloned()
        }))
    }

    fn timespans(&self, path: &BranchPath) -> Result<Vec<BranchTimespan>, StoreError> {
        self.branches
            .get(path)
            .map(|entry| entry.history.clone())
            .ok_or_else(|| StoreError::not_found("branch", path))
    }

    fn list(&self) -> Result<Vec<BranchRecord>, StoreError> {
        let mut all: Vec<_> = self
            .branches
            .iter()
            .map(|entry| entry.record.clone())
            .collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }
}
