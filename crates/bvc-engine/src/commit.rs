//! Commits
//!
//! A [`Commit`] is an open, locked unit of change on one branch (two for a
//! promotion). Writes are buffered in the commit and only reach the record
//! store when [`CommitManager::complete`] runs, which then moves the branch
//! head. Because visibility is bounded by head, a commit's versions become
//! visible all at once or not at all.
//!
//! # Lifecycle
//! ```text
//! open ──► write/delete* ──► complete ──► head = timepoint, unlocked
//!   │                           │
//!   └──── rollback / drop ◄─────┘ (write failure)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bvc_model::{
    BranchLock, BranchPath, BranchRecord, BusinessId, CommitType, ContentComparable, Timepoint,
    VersionId, VersionedRecord,
};
use bvc_store::{RecordStore, RollbackSummary, Versioned};
use tracing::{debug, error, info, warn};

use crate::error::{VcError, VcResult};
use crate::registry::BranchRegistry;
use crate::visibility::{View, VisibilityResolver};

/// Result of [`Commit::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new version will be written
    Staged,
    /// Content equals what the branch already sees; nothing to write
    Unchanged,
}

/// What [`CommitManager::rollback_completed`] undid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBackCommit {
    /// Branch the commit was on
    pub path: BranchPath,
    /// Timepoint of the removed commit
    pub timepoint: Timepoint,
    /// Head the branch returned to
    pub head: Timepoint,
    /// Versions the commit wrote and that were removed
    pub removed: usize,
    /// Versions the commit had ended and that are current again
    pub reopened: usize,
    /// Children whose base is the removed commit
    pub stale_children: Vec<BranchPath>,
}

/// Opens and completes commits
pub struct CommitManager<C> {
    registry: BranchRegistry,
    records: Arc<dyn RecordStore<C>>,
    resolver: VisibilityResolver<C>,
}

impl<C> Clone for CommitManager<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            records: Arc::clone(&self.records),
            resolver: self.resolver.clone(),
        }
    }
}

impl<C> std::fmt::Debug for CommitManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitManager").finish_non_exhaustive()
    }
}

impl<C: ContentComparable> CommitManager<C> {
    /// Manager over the given registry and record store
    #[must_use]
    pub fn new(
        registry: BranchRegistry,
        records: Arc<dyn RecordStore<C>>,
        resolver: VisibilityResolver<C>,
    ) -> Self {
        Self {
            registry,
            records,
            resolver,
        }
    }

    /// Open a commit on `path`
    ///
    /// - `CONTENT`: locks `path`; `source` is recorded but not checked
    /// - `REBASE`: locks `path`; `source` must be its parent (defaults to
    ///   it) and must not be locked
    /// - `PROMOTION`: `path` is the parent, `source` the child; both are
    ///   locked in path order
    ///
    /// The timepoint is `max(now, head + 1)` over every locked branch, so
    /// it is strictly after each participant's head.
    ///
    /// # Errors
    /// - [`VcError::BranchLocked`] if a participant is locked or changes
    ///   while the lock is being taken
    /// - [`VcError::NotParentChild`], [`VcError::MissingSource`] for bad pairs
    pub fn open(
        &self,
        path: &BranchPath,
        commit_type: CommitType,
        source: Option<&BranchPath>,
    ) -> VcResult<Commit<C>> {
        match commit_type {
            CommitType::Content => {
                let source = source.map(|s| self.registry.get(s)).transpose()?;
                self.open_single(path, commit_type, source.map(|s| s.value))
            }
            CommitType::Rebase => {
                let parent = match source {
                    Some(parent) => parent.clone(),
                    None => path
                        .parent()
                        .ok_or_else(|| VcError::RootBranch { path: path.clone() })?,
                };
                if !parent.is_parent_of(path) {
                    return Err(VcError::NotParentChild {
                        source_path: parent,
                        target_path: path.clone(),
                    });
                }
                let parent = self.registry.get(&parent)?.value;
                if parent.is_locked() {
                    return Err(VcError::BranchLocked { path: parent.path });
                }
                self.open_single(path, commit_type, Some(parent))
            }
            CommitType::Promotion => {
                let child = source.ok_or_else(|| VcError::MissingSource {
                    path: path.clone(),
                    commit_type,
                })?;
                if !path.is_parent_of(child) {
                    return Err(VcError::NotParentChild {
                        source_path: child.clone(),
                        target_path: path.clone(),
                    });
                }
                self.open_promotion(path, child)
            }
        }
    }

    fn open_single(
        &self,
        path: &BranchPath,
        commit_type: CommitType,
        source: Option<BranchRecord>,
    ) -> VcResult<Commit<C>> {
        let seen = self.registry.get(path)?;
        let mut timepoint = seen.value.next_timepoint(self.registry.now());
        if let (CommitType::Rebase, Some(parent)) = (commit_type, &source) {
            // keeps base <= head after the rebase
            timepoint = timepoint.max(parent.head);
        }
        let lock = BranchLock::for_commit(timepoint, commit_type, path);
        let locked = self.registry.try_lock(&seen, lock.clone())?;
        debug!(branch = %path, %timepoint, %commit_type, "Commit opened");
        Ok(Commit::new(self.clone(), locked.value, lock, commit_type, source))
    }

    fn open_promotion(&self, parent: &BranchPath, child: &BranchPath) -> VcResult<Commit<C>> {
        let seen_parent = self.registry.get(parent)?;
        let seen_child = self.registry.get(child)?;
        let now = self.registry.now();
        let timepoint = seen_parent
            .value
            .next_timepoint(now)
            .max(seen_child.value.next_timepoint(now));
        let lock = BranchLock::for_commit(timepoint, CommitType::Promotion, parent);

        let mut order = [&seen_parent, &seen_child];
        order.sort_by(|a, b| a.value.path.cmp(&b.value.path));

        let mut acquired: Vec<Versioned<BranchRecord>> = Vec::with_capacity(2);
        for seen in order {
            match self.registry.try_lock(seen, lock.clone()) {
                Ok(locked) => acquired.push(locked),
                Err(e) => {
                    for held in acquired.iter().rev() {
                        self.release_quietly(&held.value.path, &lock);
                    }
                    return Err(e);
                }
            }
        }

        let mut parent_record = None;
        let mut child_record = None;
        for locked in acquired {
            if &locked.value.path == parent {
                parent_record = Some(locked.value);
            } else {
                child_record = Some(locked.value);
            }
        }
        let (Some(parent_record), Some(child_record)) = (parent_record, child_record) else {
            return Err(VcError::LockLost {
                path: parent.clone(),
                timepoint,
            });
        };

        debug!(parent = %parent, child = %child, %timepoint, "Promotion commit opened");
        Ok(Commit::new(
            self.clone(),
            parent_record,
            lock,
            CommitType::Promotion,
            Some(child_record),
        ))
    }

    /// Write the commit's versions, then advance head and release locks
    ///
    /// # Errors
    /// - [`VcError::WriteFailed`] if the record store rejects the writes;
    ///   partial writes are purged, locks released and head untouched
    /// - [`VcError::LockLost`] if the lock was taken away (administrative
    ///   unlock) before head could move
    pub fn complete(&self, mut commit: Commit<C>) -> VcResult<Timepoint> {
        let timepoint = commit.timepoint;
        let path = commit.branch.path.clone();
        for locked in commit.locked_paths() {
            if let Err(e) = self.registry.check_held(&locked, &commit.lock) {
                warn!(branch = %locked, %timepoint, "Lock lost before commit writes");
                commit.abort();
                return Err(e);
            }
        }
        let has_changes = commit.has_changes();
        let staged: Vec<_> = std::mem::take(&mut commit.staged).into_values().collect();
        let written = staged.len();
        let ended: Vec<_> = commit.ended.iter().copied().collect();

        let write = self
            .records
            .insert(staged)
            .and_then(|()| self.records.end(&ended, timepoint));
        if let Err(source) = write {
            warn!(branch = %path, %timepoint, error = %source, "Commit write failed, rolling back");
            commit.abort();
            return Err(VcError::WriteFailed {
                path,
                timepoint,
                source,
            });
        }

        if let Err(e) = self.advance_target(&commit, has_changes) {
            warn!(branch = %path, %timepoint, error = %e, "Head advance failed, rolling back");
            commit.abort();
            return Err(e);
        }
        if let Err(e) = self.advance_promoted_child(&commit) {
            // Parent head already moved, so its new versions may have been read.
            error!(branch = %path, %timepoint, error = %e, "Promotion source could not be updated");
            commit.finished = true;
            self.release_quietly(&path, &commit.lock);
            return Err(e);
        }

        commit.finished = true;
        info!(
            branch = %path,
            %timepoint,
            commit_type = %commit.commit_type,
            written,
            ended = ended.len(),
            replaced = commit.replaced.len(),
            "Commit completed"
        );
        Ok(timepoint)
    }

    /// Abandon a commit, undoing anything it wrote and releasing its locks
    pub fn rollback(&self, mut commit: Commit<C>) {
        commit.abort();
    }

    /// Administrative unlock that also discards the holder's partial commit
    ///
    /// Versions the holder wrote at its timepoint are removed and versions it
    /// ended are reopened, so nothing of the abandoned commit becomes visible
    /// when head later moves past that timepoint.
    ///
    /// # Errors
    /// As [`BranchRegistry::unlock`], plus record store failures
    pub fn unlock(&self, path: &BranchPath) -> VcResult<Option<BranchLock>> {
        let Some(held) = self.registry.unlock(path)? else {
            return Ok(None);
        };
        let summary = self.records.rollback(path, held.timepoint)?;
        if summary != RollbackSummary::default() {
            warn!(
                branch = %path,
                timepoint = %held.timepoint,
                removed = summary.removed,
                reopened = summary.reopened,
                "Partial commit rolled back"
            );
        }
        Ok(Some(held))
    }

    /// Undo the latest completed commit on `path`
    ///
    /// The branch returns to the timespan before the commit, the commit's
    /// versions are removed and the versions it ended reopened. Children
    /// rebased onto the commit keep their base and are reported; they must
    /// be rebased again.
    ///
    /// # Errors
    /// - [`VcError::NotLatestCommit`] if `timepoint` is not the head
    /// - [`VcError::BranchLocked`] if a commit holds the branch
    /// - [`VcError::Store`] if the commit created the branch
    pub fn rollback_completed(
        &self,
        path: &BranchPath,
        timepoint: Timepoint,
    ) -> VcResult<RolledBackCommit> {
        let seen = self.registry.get(path)?;
        if seen.value.head != timepoint {
            return Err(VcError::NotLatestCommit {
                path: path.clone(),
                timepoint,
                head: seen.value.head,
            });
        }
        let lock = BranchLock::maintenance(
            seen.value.next_timepoint(self.registry.now()),
            format!("rollback of commit {timepoint}"),
        );
        self.registry.try_lock(&seen, lock.clone())?;

        // head moves back first so the purge is never observable
        let reverted = match self.registry.revert_head(path, &lock) {
            Ok(reverted) => reverted,
            Err(e) => {
                self.release_quietly(path, &lock);
                return Err(e);
            }
        };
        let purged = self.records.rollback(path, timepoint);
        self.registry.update_locked(path, &lock, |b| {
            b.lock = None;
            b.fence = b.fence.max(Some(timepoint));
        })?;
        let summary = purged?;

        let stale_children: Vec<_> = self
            .registry
            .children(path)?
            .into_iter()
            .filter(|child| child.base == timepoint)
            .map(|child| child.path)
            .collect();
        for child in &stale_children {
            warn!(branch = %path, child = %child, %timepoint, "Child is based on the rolled back commit and must be rebased");
        }
        info!(
            branch = %path,
            %timepoint,
            head = %reverted.value.head,
            removed = summary.removed,
            reopened = summary.reopened,
            "Commit rolled back"
        );
        Ok(RolledBackCommit {
            path: path.clone(),
            timepoint,
            head: reverted.value.head,
            removed: summary.removed,
            reopened: summary.reopened,
            stale_children,
        })
    }

    fn advance_target(&self, commit: &Commit<C>, has_changes: bool) -> VcResult<()> {
        let timepoint = commit.timepoint;
        self.registry
            .update_locked(&commit.branch.path, &commit.lock, |b| {
                b.head = timepoint;
                if let Some(base) = commit.new_base {
                    b.base = base;
                }
                if !b.path.is_root() {
                    b.tombstones.extend(commit.replaced.iter().copied());
                }
                match commit.commit_type {
                    CommitType::Content => b.contains_content |= has_changes,
                    CommitType::Rebase => {}
                    CommitType::Promotion => {
                        b.contains_content = true;
                        b.last_promotion = Some(timepoint);
                    }
                }
                if commit.commit_type != CommitType::Promotion {
                    b.lock = None;
                }
            })
            .map(|_| ())
    }

    /// Reset the promoted child to the promotion timepoint, then unlock the
    /// parent (reverse of acquisition order)
    fn advance_promoted_child(&self, commit: &Commit<C>) -> VcResult<()> {
        if commit.commit_type != CommitType::Promotion {
            return Ok(());
        }
        let timepoint = commit.timepoint;
        if let Some(child) = &commit.source {
            self.registry.update_locked(&child.path, &commit.lock, |b| {
                b.base = timepoint;
                b.head = timepoint;
                b.tombstones.clear();
                b.contains_content = false;
                b.lock = None;
            })?;
        }
        self.registry.release(&commit.branch.path, &commit.lock)
    }

    fn release_quietly(&self, path: &BranchPath, held: &BranchLock) {
        if let Err(e) = self.registry.release(path, held) {
            error!(branch = %path, timepoint = %held.timepoint, error = %e, "Failed to release lock");
        }
    }

    fn purge(&self, path: &BranchPath, timepoint: Timepoint) {
        if let Err(e) = self.records.rollback(path, timepoint) {
            error!(branch = %path, %timepoint, error = %e, "Failed to purge commit writes");
        }
    }
}

/// An open commit
///
/// Dropping an open commit rolls it back.
pub struct Commit<C: ContentComparable> {
    manager: CommitManager<C>,
    branch: BranchRecord,
    lock: BranchLock,
    timepoint: Timepoint,
    commit_type: CommitType,
    source: Option<BranchRecord>,
    replaced: BTreeSet<VersionId>,
    ended: BTreeSet<VersionId>,
    staged: BTreeMap<BusinessId, VersionedRecord<C>>,
    deleted: BTreeSet<BusinessId>,
    new_base: Option<Timepoint>,
    view: Option<View<C>>,
    finished: bool,
}

impl<C: ContentComparable> std::fmt::Debug for Commit<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commit")
            .field("branch", &self.branch.path)
            .field("timepoint", &self.timepoint)
            .field("commit_type", &self.commit_type)
            .field("source", &self.source.as_ref().map(|s| &s.path))
            .field("staged", &self.staged.len())
            .field("ended", &self.ended.len())
            .field("replaced", &self.replaced.len())
            .finish_non_exhaustive()
    }
}

impl<C: ContentComparable> Commit<C> {
    fn new(
        manager: CommitManager<C>,
        branch: BranchRecord,
        lock: BranchLock,
        commit_type: CommitType,
        source: Option<BranchRecord>,
    ) -> Self {
        Self {
            manager,
            branch,
            timepoint: lock.timepoint,
            lock,
            commit_type,
            source,
            replaced: BTreeSet::new(),
            ended: BTreeSet::new(),
            staged: BTreeMap::new(),
            deleted: BTreeSet::new(),
            new_base: None,
            view: None,
            finished: false,
        }
    }

    /// Commit timepoint
    #[inline]
    #[must_use]
    pub fn timepoint(&self) -> Timepoint {
        self.timepoint
    }

    /// Branch the commit writes to
    #[inline]
    #[must_use]
    pub fn branch_path(&self) -> &BranchPath {
        &self.branch.path
    }

    /// Commit kind
    #[inline]
    #[must_use]
    pub fn commit_type(&self) -> CommitType {
        self.commit_type
    }

    /// Counterpart branch of a rebase or promotion
    #[inline]
    #[must_use]
    pub fn source_path(&self) -> Option<&BranchPath> {
        self.source.as_ref().map(|s| &s.path)
    }

    /// Inherited versions this commit hides on its branch
    #[inline]
    #[must_use]
    pub fn replaced(&self) -> &BTreeSet<VersionId> {
        &self.replaced
    }

    /// Whether the commit would write, end or hide anything
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.staged.is_empty() && self.ended.is_empty() && self.replaced.is_empty())
    }

    /// Write `content` as the new version of `id`
    ///
    /// Content equal to the version the branch already sees is suppressed.
    /// Otherwise the branch's own current version is ended, or an inherited
    /// one tombstoned.
    ///
    /// # Errors
    /// Resolver errors while reading the branch's current view
    pub fn write(&mut self, id: BusinessId, content: C) -> VcResult<WriteOutcome> {
        if let Some(staged) = self.staged.get_mut(&id) {
            if !staged.content.is_content_changed(&content) {
                return Ok(WriteOutcome::Unchanged);
            }
            staged.content = content;
            return Ok(WriteOutcome::Staged);
        }

        let previously_deleted = self.deleted.remove(&id);
        if !previously_deleted {
            if let Some(current) = self.visible(&id)?.cloned() {
                if !current.content.is_content_changed(&content) {
                    return Ok(WriteOutcome::Unchanged);
                }
                self.supersede(&current);
            }
        }

        debug!(branch = %self.branch.path, business_id = %id, "Staged write");
        let version = VersionedRecord::new(id.clone(), self.branch.path.clone(), self.timepoint, content);
        self.staged.insert(id, version);
        Ok(WriteOutcome::Staged)
    }

    /// Delete `id` from the branch's view
    ///
    /// Returns `false` if the branch does not see the entity.
    ///
    /// # Errors
    /// Resolver errors while reading the branch's current view
    pub fn delete(&mut self, id: &BusinessId) -> VcResult<bool> {
        if self.deleted.contains(id) {
            return Ok(false);
        }
        if self.staged.remove(id).is_some() {
            self.deleted.insert(id.clone());
            return Ok(true);
        }
        let Some(current) = self.visible(id)?.cloned() else {
            return Ok(false);
        };
        self.supersede(&current);
        self.deleted.insert(id.clone());
        debug!(branch = %self.branch.path, business_id = %id, "Staged delete");
        Ok(true)
    }

    /// Complete through the owning manager
    ///
    /// # Errors
    /// As [`CommitManager::complete`]
    pub fn complete(self) -> VcResult<Timepoint> {
        let manager = self.manager.clone();
        manager.complete(self)
    }

    fn visible(&mut self, id: &BusinessId) -> VcResult<Option<&VersionedRecord<C>>> {
        if self.view.is_none() {
            let view = self
                .manager
                .resolver
                .resolve_records(&self.branch.path, self.branch.head)?;
            self.view = Some(view);
        }
        Ok(self.view.as_ref().and_then(|v| v.get(id)))
    }

    fn supersede(&mut self, current: &VersionedRecord<C>) {
        if current.origin == self.branch.path {
            self.ended.insert(current.version_id);
        } else {
            self.replaced.insert(current.version_id);
        }
    }

    pub(crate) fn branch(&self) -> &BranchRecord {
        &self.branch
    }

    pub(crate) fn source(&self) -> Option<&BranchRecord> {
        self.source.as_ref()
    }

    pub(crate) fn stage(&mut self, version: VersionedRecord<C>) {
        self.staged.insert(version.business_id.clone(), version);
    }

    pub(crate) fn end_version(&mut self, id: VersionId) {
        self.ended.insert(id);
    }

    pub(crate) fn replace_version(&mut self, id: VersionId) {
        self.replaced.insert(id);
    }

    pub(crate) fn set_base(&mut self, base: Timepoint) {
        self.new_base = Some(base);
    }

    fn locked_paths(&self) -> Vec<BranchPath> {
        let mut paths = vec![self.branch.path.clone()];
        if self.commit_type == CommitType::Promotion {
            if let Some(source) = &self.source {
                paths.push(source.path.clone());
            }
        }
        paths.sort();
        paths
    }

    fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let locked = self.locked_paths();
        for path in &locked {
            self.manager.purge(path, self.timepoint);
        }
        for path in locked.iter().rev() {
            self.manager.release_quietly(path, &self.lock);
        }
        debug!(branch = %self.branch.path, timepoint = %self.timepoint, "Commit rolled back");
    }
}

impl<C: ContentComparable> Drop for Commit<C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                branch = %self.branch.path,
                timepoint = %self.timepoint,
                "Open commit dropped without completion"
            );
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bvc_model::{FieldMap, ManualClock};
    use bvc_store::{MemoryBranchStore, MemoryRecordStore};

    struct Fixture {
        manager: CommitManager<FieldMap>,
        registry: BranchRegistry,
        resolver: VisibilityResolver<FieldMap>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(100));
        let registry = BranchRegistry::new(Arc::new(MemoryBranchStore::new()), clock.clone());
        let records: Arc<dyn RecordStore<FieldMap>> = Arc::new(MemoryRecordStore::new());
        let resolver = VisibilityResolver::new(registry.clone(), records.clone(), 16);
        let manager = CommitManager::new(registry.clone(), records, resolver.clone());
        registry.create(&path("MAIN")).unwrap();
        Fixture {
            manager,
            registry,
            resolver,
            clock,
        }
    }

    fn path(s: &str) -> BranchPath {
        s.parse().unwrap()
    }

    fn term(t: &str) -> FieldMap {
        FieldMap::new().with("term", t)
    }

    #[test]
    fn timepoint_is_strictly_after_head() {
        let fx = fixture();
        let main = path("MAIN");
        // wall clock equals head
        let commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert_eq!(commit.timepoint(), Timepoint::from_millis(101));
        commit.complete().unwrap();

        // wall clock behind head (skew)
        fx.clock.set(50);
        let commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert_eq!(commit.timepoint(), Timepoint::from_millis(102));
        fx.manager.rollback(commit);

        fx.clock.set(500);
        let commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert_eq!(commit.timepoint(), Timepoint::from_millis(500));
    }

    #[test]
    fn second_open_is_locked_out() {
        let fx = fixture();
        let main = path("MAIN");
        let first = fx.manager.open(&main, CommitType::Content, None).unwrap();
        let err = fx.manager.open(&main, CommitType::Content, None).unwrap_err();
        assert!(matches!(err, VcError::BranchLocked { .. }));
        drop(first);
        assert!(fx.manager.open(&main, CommitType::Content, None).is_ok());
    }

    #[test]
    fn complete_advances_head_and_unlocks() {
        let fx = fixture();
        let main = path("MAIN");
        fx.clock.set(110);
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert_eq!(commit.write("X".into(), term("one")).unwrap(), WriteOutcome::Staged);
        let tp = commit.complete().unwrap();

        let branch = fx.registry.get(&main).unwrap().value;
        assert_eq!(branch.head, tp);
        assert!(!branch.is_locked());
        assert!(branch.tombstones.is_empty());
        assert!(branch.contains_content);
        assert_eq!(fx.resolver.resolve_head(&main).unwrap().len(), 1);
    }

    #[test]
    fn writes_are_invisible_until_complete() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        assert!(fx.resolver.resolve_head(&main).unwrap().is_empty());
        commit.complete().unwrap();
        assert_eq!(fx.resolver.resolve_head(&main).unwrap().len(), 1);
    }

    #[test]
    fn equal_content_is_suppressed() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        assert_eq!(
            commit.write("X".into(), term("one")).unwrap(),
            WriteOutcome::Unchanged
        );
        commit.complete().unwrap();

        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert_eq!(
            commit.write("X".into(), term("one")).unwrap(),
            WriteOutcome::Unchanged
        );
        assert!(!commit.has_changes());
    }

    #[test]
    fn rewrite_on_owning_branch_ends_previous_version() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        commit.complete().unwrap();
        let before = fx.resolver.resolve_head(&main).unwrap();

        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("two")).unwrap();
        assert!(commit.replaced().is_empty());
        commit.complete().unwrap();

        let after = fx.resolver.resolve_head(&main).unwrap();
        let x = BusinessId::new("X");
        assert_ne!(before[&x].version_id, after[&x].version_id);
        assert_eq!(after[&x].content.get_str("term"), Some("two"));
    }

    #[test]
    fn child_write_tombstones_inherited_version() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        commit.complete().unwrap();
        let x1 = fx.resolver.resolve_head(&main).unwrap()[&BusinessId::new("X")].version_id;

        let child = path("MAIN/A");
        fx.registry.create(&child).unwrap();
        let mut commit = fx.manager.open(&child, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("child")).unwrap();
        assert!(commit.replaced().contains(&x1));
        commit.complete().unwrap();

        let branch = fx.registry.get(&child).unwrap().value;
        assert!(branch.tombstones.contains(&x1));
        let view = fx.resolver.resolve_head(&child).unwrap();
        assert_eq!(view[&BusinessId::new("X")].origin, child);
    }

    #[test]
    fn delete_hides_inherited_and_own_versions() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        commit.write("Y".into(), term("two")).unwrap();
        commit.complete().unwrap();

        let child = path("MAIN/A");
        fx.registry.create(&child).unwrap();
        let mut commit = fx.manager.open(&child, CommitType::Content, None).unwrap();
        assert!(commit.delete(&"X".into()).unwrap());
        assert!(!commit.delete(&"X".into()).unwrap());
        assert!(!commit.delete(&"missing".into()).unwrap());
        commit.complete().unwrap();
        let view = fx.resolver.resolve_head(&child).unwrap();
        assert_eq!(view.keys().map(BusinessId::as_str).collect::<Vec<_>>(), vec!["Y"]);

        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert!(commit.delete(&"Y".into()).unwrap());
        commit.complete().unwrap();
        let view = fx.resolver.resolve_head(&main).unwrap();
        assert_eq!(view.keys().map(BusinessId::as_str).collect::<Vec<_>>(), vec!["X"]);
    }

    #[test]
    fn write_after_delete_in_same_commit() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        commit.complete().unwrap();

        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.delete(&"X".into()).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        commit.complete().unwrap();
        let view = fx.resolver.resolve_head(&main).unwrap();
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn dropped_commit_releases_lock_and_keeps_head() {
        let fx = fixture();
        let main = path("MAIN");
        let head = fx.registry.get(&main).unwrap().value.head;
        {
            let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
            commit.write("X".into(), term("one")).unwrap();
        }
        let branch = fx.registry.get(&main).unwrap().value;
        assert!(!branch.is_locked());
        assert_eq!(branch.head, head);
        assert!(fx.resolver.resolve_head(&main).unwrap().is_empty());
    }

    #[test]
    fn admin_unlock_makes_completion_fail() {
        let fx = fixture();
        let main = path("MAIN");
        let mut commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        commit.write("X".into(), term("one")).unwrap();
        fx.registry.unlock(&main).unwrap();
        assert!(matches!(commit.complete(), Err(VcError::LockLost { .. })));
        assert!(fx.resolver.resolve_head(&main).unwrap().is_empty());
    }

    #[test]
    fn rebase_requires_parent_pair_and_unlocked_parent() {
        let fx = fixture();
        let main = path("MAIN");
        let child = path("MAIN/A");
        fx.registry.create(&child).unwrap();

        assert!(matches!(
            fx.manager.open(&main, CommitType::Rebase, None),
            Err(VcError::RootBranch { .. })
        ));
        assert!(matches!(
            fx.manager.open(&child, CommitType::Rebase, Some(&path("OTHER"))),
            Err(VcError::NotParentChild { .. })
        ));

        let parent_commit = fx.manager.open(&main, CommitType::Content, None).unwrap();
        assert!(matches!(
            fx.manager.open(&child, CommitType::Rebase, None),
            Err(VcError::BranchLocked { path }) if path == main
        ));
        drop(parent_commit);
        let rebase = fx.manager.open(&child, CommitType::Rebase, None).unwrap();
        assert_eq!(rebase.source_path(), Some(&main));
    }

    #[test]
    fn promotion_locks_both_branches() {
        let fx = fixture();
        let main = path("MAIN");
        let child = path("MAIN/A");
        fx.registry.create(&child).unwrap();

        assert!(matches!(
            fx.manager.open(&main, CommitType::Promotion, None),
            Err(VcError::MissingSource { .. })
        ));

        let commit = fx
            .manager
            .open(&main, CommitType::Promotion, Some(&child))
            .unwrap();
        assert!(fx.registry.get(&main).unwrap().value.is_locked());
        assert!(fx.registry.get(&child).unwrap().value.is_locked());
        assert!(matches!(
            fx.manager.open(&child, CommitType::Content, None),
            Err(VcError::BranchLocked { .. })
        ));
        drop(commit);
        assert!(!fx.registry.get(&main).unwrap().value.is_locked());
        assert!(!fx.registry.get(&child).unwrap().value.is_locked());
    }

    #[test]
    fn promotion_open_backs_out_when_child_is_locked() {
        let fx = fixture();
        let main = path("MAIN");
        let child = path("MAIN/A");
        fx.registry.create(&child).unwrap();
        let child_commit = fx.manager.open(&child, CommitType::Content, None).unwrap();

        assert!(matches!(
            fx.manager.open(&main, CommitType::Promotion, Some(&child)),
            Err(VcError::BranchLocked { path }) if path == child
        ));
        assert!(!fx.registry.get(&main).unwrap().value.is_locked());
        drop(child_commit);
    }
}
