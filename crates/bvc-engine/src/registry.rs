//! Branch registry
//!
//! [`BranchRegistry`] is the only component that writes branch records.
//! Every mutation is a revision-checked write against the [`BranchStore`],
//! so two engine instances sharing a store can never both believe they hold
//! a branch lock.

use std::sync::Arc;

use bvc_model::{
    BranchLock, BranchPath, BranchRecord, BranchTimespan, Clock, SyncState, Timepoint,
};
use bvc_store::{BranchStore, StoreError, Versioned};
use tracing::{debug, info, warn};

use crate::error::{VcError, VcResult};

/// Branch CRUD, locking and history lookups
#[derive(Debug, Clone)]
pub struct BranchRegistry {
    store: Arc<dyn BranchStore>,
    clock: Arc<dyn Clock>,
}

impl BranchRegistry {
    /// Registry over a store
    #[must_use]
    pub fn new(store: Arc<dyn BranchStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current time according to the engine clock
    #[inline]
    #[must_use]
    pub fn now(&self) -> Timepoint {
        self.clock.now()
    }

    /// Create a branch
    ///
    /// A root branch starts with `base = head = now`. A child starts with
    /// `base` = parent head (it sees the parent exactly as it is) and
    /// `head` = now.
    ///
    /// # Errors
    /// - [`VcError::BranchExists`] if the path is taken
    /// - [`VcError::BranchNotFound`] if the parent does not exist
    pub fn create(&self, path: &BranchPath) -> VcResult<BranchRecord> {
        if self.store.get(path)?.is_some() {
            return Err(VcError::BranchExists { path: path.clone() });
        }
        let now = self.now();
        let record = match path.parent() {
            None => BranchRecord::new(path.clone(), now, now),
            Some(parent) => {
                let parent = self.get(&parent)?.value;
                BranchRecord::new(path.clone(), now.max(parent.head), parent.head)
            }
        };
        let created = self.store.insert(record).map_err(|e| match e {
            StoreError::AlreadyExists { .. } => VcError::BranchExists { path: path.clone() },
            other => VcError::Store(other),
        })?;
        info!(branch = %path, base = %created.value.base, head = %created.value.head, "Branch created");
        Ok(created.value)
    }

    /// Current record with its revision
    ///
    /// # Errors
    /// [`VcError::BranchNotFound`] if absent
    pub fn get(&self, path: &BranchPath) -> VcResult<Versioned<BranchRecord>> {
        self.store
            .get(path)?
            .ok_or_else(|| VcError::BranchNotFound { path: path.clone() })
    }

    /// Current record, if the branch exists
    ///
    /// # Errors
    /// Store failures only
    pub fn find(&self, path: &BranchPath) -> VcResult<Option<BranchRecord>> {
        Ok(self.store.get(path)?.map(|v| v.value))
    }

    /// All branches in path order
    ///
    /// # Errors
    /// Store failures only
    pub fn list(&self) -> VcResult<Vec<BranchRecord>> {
        Ok(self.store.list()?)
    }

    /// Direct children in path order
    ///
    /// # Errors
    /// Store failures only
    pub fn children(&self, path: &BranchPath) -> VcResult<Vec<BranchRecord>> {
        Ok(self.store.children(path)?)
    }

    /// Parent's record for a child path
    ///
    /// # Errors
    /// - [`VcError::RootBranch`] if `path` has no parent
    /// - [`VcError::BranchNotFound`] if the parent is missing
    pub fn parent_of(&self, path: &BranchPath) -> VcResult<Versioned<BranchRecord>> {
        let parent = path
            .parent()
            .ok_or_else(|| VcError::RootBranch { path: path.clone() })?;
        self.get(&parent)
    }

    /// Position of a branch relative to its parent; roots are always up to date
    ///
    /// # Errors
    /// [`VcError::BranchNotFound`] if the branch or its parent is missing
    pub fn sync_state(&self, path: &BranchPath) -> VcResult<SyncState> {
        let branch = self.get(path)?.value;
        if path.is_root() {
            return Ok(SyncState::UpToDate);
        }
        let parent = self.parent_of(path)?.value;
        Ok(branch.sync_state(parent.head))
    }

    /// Timespan of `path` in force at `at`
    ///
    /// # Errors
    /// [`VcError::BranchNotFoundAt`] if the branch did not exist at `at`
    pub fn timespan_at(&self, path: &BranchPath, at: Timepoint) -> VcResult<BranchTimespan> {
        self.store
            .timespan_at(path, at)?
            .ok_or_else(|| VcError::BranchNotFoundAt {
                path: path.clone(),
                timepoint: at,
            })
    }

    /// Full history of a branch
    ///
    /// # Errors
    /// [`VcError::BranchNotFound`] if absent
    pub fn timespans(&self, path: &BranchPath) -> VcResult<Vec<BranchTimespan>> {
        self.store.timespans(path).map_err(|e| match e {
            StoreError::NotFound { .. } => VcError::BranchNotFound { path: path.clone() },
            other => VcError::Store(other),
        })
    }

    /// Take the lock on a record previously read at `seen.revision`
    ///
    /// # Errors
    /// [`VcError::BranchLocked`] if the branch is locked or changed since
    /// it was read
    pub fn try_lock(
        &self,
        seen: &Versioned<BranchRecord>,
        lock: BranchLock,
    ) -> VcResult<Versioned<BranchRecord>> {
        let path = &seen.value.path;
        if seen.value.is_locked() {
            return Err(VcError::BranchLocked { path: path.clone() });
        }
        let mut next = seen.value.clone();
        next.lock = Some(lock);
        match self.store.compare_and_set(seen.revision, next) {
            Ok(locked) => {
                debug!(branch = %path, timepoint = ?locked.value.lock.as_ref().map(|l| l.timepoint), "Lock acquired");
                Ok(locked)
            }
            Err(StoreError::RevisionMismatch { .. }) => {
                warn!(branch = %path, "Lock contention");
                Err(VcError::BranchLocked { path: path.clone() })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Current record, provided `held` is still its lock
    ///
    /// # Errors
    /// [`VcError::LockLost`] if the lock was released or replaced
    pub fn check_held(
        &self,
        path: &BranchPath,
        held: &BranchLock,
    ) -> VcResult<Versioned<BranchRecord>> {
        let current = self.get(path)?;
        if current.value.is_locked_by(held) {
            Ok(current)
        } else {
            Err(VcError::LockLost {
                path: path.clone(),
                timepoint: held.timepoint,
            })
        }
    }

    /// Apply `update` to a branch still locked by `held`
    ///
    /// # Errors
    /// [`VcError::LockLost`] if the lock is no longer `held` or the record
    /// changed concurrently
    pub fn update_locked<F>(
        &self,
        path: &BranchPath,
        held: &BranchLock,
        update: F,
    ) -> VcResult<Versioned<BranchRecord>>
    where
        F: FnOnce(&mut BranchRecord),
    {
        let lost = || VcError::LockLost {
            path: path.clone(),
            timepoint: held.timepoint,
        };
        let current = self.check_held(path, held)?;
        let mut next = current.value;
        update(&mut next);
        match self.store.compare_and_set(current.revision, next) {
            Ok(written) => Ok(written),
            Err(StoreError::RevisionMismatch { .. }) => Err(lost()),
            Err(other) => Err(other.into()),
        }
    }

    /// Return a branch locked by `held` to its previous timespan
    ///
    /// # Errors
    /// - [`VcError::LockLost`] if the lock is no longer `held`
    /// - [`VcError::Store`] with [`StoreError::NoEarlierTimespan`] if there
    ///   is nothing to go back to
    pub fn revert_head(
        &self,
        path: &BranchPath,
        held: &BranchLock,
    ) -> VcResult<Versioned<BranchRecord>> {
        let current = self.check_held(path, held)?;
        match self.store.revert_head(path, current.revision) {
            Ok(reverted) => Ok(reverted),
            Err(StoreError::RevisionMismatch { .. }) => Err(VcError::LockLost {
                path: path.clone(),
                timepoint: held.timepoint,
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Release `held`
    ///
    /// Releasing a lock that is no longer held is logged and ignored.
    ///
    /// # Errors
    /// Store failures only
    pub fn release(&self, path: &BranchPath, held: &BranchLock) -> VcResult<()> {
        let timepoint = held.timepoint;
        match self.update_locked(path, held, |b| b.lock = None) {
            Ok(_) => {
                debug!(branch = %path, %timepoint, "Lock released");
                Ok(())
            }
            Err(VcError::LockLost { .. }) => {
                warn!(branch = %path, %timepoint, "Lock already released");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Administrative unlock, regardless of holder
    ///
    /// Only for recovering from a crashed writer: if the holder is in fact
    /// alive, its completion will fail with [`VcError::LockLost`]. The
    /// removed lock's timepoint becomes the branch fence, so no later commit
    /// reuses it. Records are not touched here; see
    /// [`CommitManager::unlock`](crate::CommitManager::unlock).
    ///
    /// # Errors
    /// - [`VcError::BranchNotFound`] if absent
    /// - [`VcError::BranchLocked`] if the record changed concurrently
    pub fn unlock(&self, path: &BranchPath) -> VcResult<Option<BranchLock>> {
        let current = self.get(path)?;
        let Some(held) = current.value.lock.clone() else {
            return Ok(None);
        };
        let mut next = current.value;
        next.lock = None;
        next.fence = next.fence.max(Some(held.timepoint));
        self.store
            .compare_and_set(current.revision, next)
            .map_err(|e| match e {
                StoreError::RevisionMismatch { .. } => VcError::BranchLocked { path: path.clone() },
                other => VcError::Store(other),
            })?;
        warn!(
            branch = %path,
            held_since = %held.timepoint.to_rfc3339(),
            description = %held.description,
            "Branch forcibly unlocked"
        );
        Ok(Some(held))
    }
}
