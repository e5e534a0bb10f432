//! Rebase and promotion
//!
//! [`Coordinator`] moves content between a child and its parent using
//! ordinary commits:
//!
//! - **Rebase** (child pulls): a `REBASE` commit on the child raises its base
//!   to the parent's head. Parent changes the child also edited or deleted
//!   are tombstoned on the child so the child's edit stays authoritative.
//! - **Promotion** (child pushes): a `PROMOTION` commit on the parent copies
//!   the child's current versions up, then resets the child to the new
//!   parent head. The child must be rebased first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bvc_model::{
    BranchPath, BranchState, BusinessId, CommitType, ContentComparable, Timepoint, VersionId,
    VersionedRecord,
};
use bvc_store::RecordStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::commit::{Commit, CommitManager};
use crate::error::{VcError, VcResult};
use crate::registry::BranchRegistry;
use crate::visibility::{View, VisibilityResolver};

/// Decided content for one entity during a rebase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution<C> {
    /// Child ends up with this content
    Upsert(C),
    /// Child ends up without the entity
    Delete,
}

/// Result of a rebase or promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A commit was completed at this timepoint
    Committed(Timepoint),
    /// Nothing to do; no commit was made
    NoChanges,
}

impl SyncOutcome {
    /// Commit timepoint, if a commit was made
    #[inline]
    #[must_use]
    pub fn timepoint(self) -> Option<Timepoint> {
        match self {
            Self::Committed(tp) => Some(tp),
            Self::NoChanges => None,
        }
    }

    /// Check if no commit was needed
    #[inline]
    #[must_use]
    pub fn is_no_op(self) -> bool {
        matches!(self, Self::NoChanges)
    }
}

/// Snapshots a rebase must still match, checked under the child's lock
#[derive(Debug, Clone)]
pub(crate) struct RebaseGuard {
    pub(crate) review: String,
    pub(crate) parent: BranchState,
    pub(crate) child: BranchState,
}

/// Orchestrates rebase and promotion commits
pub struct Coordinator<C> {
    registry: BranchRegistry,
    records: Arc<dyn RecordStore<C>>,
    resolver: VisibilityResolver<C>,
    commits: CommitManager<C>,
}

impl<C> Clone for Coordinator<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            records: Arc::clone(&self.records),
            resolver: self.resolver.clone(),
            commits: self.commits.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Coordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").finish_non_exhaustive()
    }
}

impl<C: ContentComparable> Coordinator<C> {
    /// Coordinator over the shared engine components
    #[must_use]
    pub fn new(
        registry: BranchRegistry,
        records: Arc<dyn RecordStore<C>>,
        resolver: VisibilityResolver<C>,
        commits: CommitManager<C>,
    ) -> Self {
        Self {
            registry,
            records,
            resolver,
            commits,
        }
    }

    /// Pull the parent's head into `child`
    ///
    /// # Errors
    /// - [`VcError::RootBranch`] for a root
    /// - [`VcError::BranchLocked`] if the child or its parent is locked
    /// - [`VcError::WriteFailed`] if the commit could not be written
    pub fn rebase(&self, child: &BranchPath) -> VcResult<SyncOutcome> {
        self.rebase_inner(child, BTreeMap::new(), None)
    }

    /// Rebase, applying decided content for conflicting entities
    ///
    /// Each resolved entity ends the child's own version, hides the
    /// parent's version and writes the resolution on the child.
    ///
    /// # Errors
    /// As [`Self::rebase`]
    pub fn rebase_with(
        &self,
        child: &BranchPath,
        resolutions: BTreeMap<BusinessId, Resolution<C>>,
    ) -> VcResult<SyncOutcome> {
        self.rebase_inner(child, resolutions, None)
    }

    pub(crate) fn rebase_inner(
        &self,
        child: &BranchPath,
        resolutions: BTreeMap<BusinessId, Resolution<C>>,
        guard: Option<RebaseGuard>,
    ) -> VcResult<SyncOutcome> {
        let parent = self.registry.parent_of(child)?.value;
        if parent.is_locked() {
            return Err(VcError::BranchLocked { path: parent.path });
        }
        let current = self.registry.get(child)?.value;
        if guard.is_none() && resolutions.is_empty() && current.base == parent.head {
            debug!(branch = %child, base = %current.base, "Already rebased");
            return Ok(SyncOutcome::NoChanges);
        }

        let mut commit = self
            .commits
            .open(child, CommitType::Rebase, Some(&parent.path))?;
        // Parent may have advanced while the child lock was taken.
        let parent = self.registry.get(&parent.path)?.value;
        let branch = commit.branch().clone();
        if let Some(guard) = &guard {
            if branch.state() != guard.child || parent.state() != guard.parent {
                warn!(branch = %child, review = %guard.review, "Branches moved since review");
                self.commits.rollback(commit);
                return Err(VcError::StaleReview {
                    id: guard.review.clone(),
                });
            }
        }
        if resolutions.is_empty() && branch.base == parent.head {
            self.commits.rollback(commit);
            return Ok(SyncOutcome::NoChanges);
        }

        commit.set_base(parent.head);
        let token = CancellationToken::new();
        let incoming = self
            .resolver
            .changes_between(&parent.path, branch.base, parent.head, &token)?;
        let child_view = self.resolver.resolve_records(child, branch.head)?;
        let deleted = self.deleted_on_child(child, &branch.tombstones, &child_view)?;

        let mut tombstoned = 0usize;
        for (id, change) in &incoming {
            if resolutions.contains_key(id) {
                continue;
            }
            let Some(newer) = &change.after else {
                continue;
            };
            let edited = child_view.get(id).is_some_and(|v| &v.origin == child);
            if edited || deleted.contains(id) {
                debug!(branch = %child, business_id = %id, version = %newer.version_id, "Keeping child edit");
                commit.replace_version(newer.version_id);
                tombstoned += 1;
            }
        }

        if !resolutions.is_empty() {
            let parent_view = self.resolver.resolve_records(&parent.path, parent.head)?;
            let timepoint = commit.timepoint();
            for (id, resolution) in resolutions {
                if let Some(own) = child_view.get(&id).filter(|v| &v.origin == child) {
                    commit.end_version(own.version_id);
                }
                if let Some(inherited) = parent_view.get(&id) {
                    commit.replace_version(inherited.version_id);
                }
                if let Resolution::Upsert(content) = resolution {
                    commit.stage(VersionedRecord::new(id, child.clone(), timepoint, content));
                }
            }
        }

        let timepoint = commit.complete()?;
        info!(
            branch = %child,
            parent = %parent.path,
            base = %parent.head,
            %timepoint,
            incoming = incoming.len(),
            tombstoned,
            "Branch rebased"
        );
        Ok(SyncOutcome::Committed(timepoint))
    }

    /// Push `child`'s changes into its parent
    ///
    /// Promoting a child with nothing unpromoted is a no-op.
    ///
    /// # Errors
    /// - [`VcError::RebaseRequired`] unless `child.base == parent.head`
    /// - [`VcError::BranchLocked`] if either branch is locked
    /// - [`VcError::WriteFailed`] if the commit could not be written
    pub fn promote(&self, child: &BranchPath) -> VcResult<SyncOutcome> {
        let parent = self.registry.parent_of(child)?.value;
        let current = self.registry.get(child)?.value;
        check_rebased(&current.path, current.base, parent.head)?;
        if current.tombstones.is_empty() && self.own_current(child)?.is_empty() {
            debug!(branch = %child, "Nothing to promote");
            return Ok(SyncOutcome::NoChanges);
        }

        let mut commit = self
            .commits
            .open(&parent.path, CommitType::Promotion, Some(child))?;
        let (parent, branch) = match commit.source() {
            Some(source) => (commit.branch().clone(), source.clone()),
            None => {
                return Err(VcError::MissingSource {
                    path: parent.path,
                    commit_type: CommitType::Promotion,
                })
            }
        };
        if let Err(e) = check_rebased(&branch.path, branch.base, parent.head) {
            self.commits.rollback(commit);
            return Err(e);
        }

        let own = self.own_current(child)?;
        if own.is_empty() && branch.tombstones.is_empty() {
            debug!(branch = %child, "Nothing to promote");
            self.commits.rollback(commit);
            return Ok(SyncOutcome::NoChanges);
        }

        let parent_view = self.resolver.resolve_records(&parent.path, parent.head)?;
        let timepoint = commit.timepoint();
        let mut promoted = BTreeSet::new();
        for version in own {
            if let Some(existing) = parent_view.get(&version.business_id) {
                hide_on_parent(&mut commit, existing);
            }
            commit.end_version(version.version_id);
            promoted.insert(version.business_id.clone());
            commit.stage(
                VersionedRecord::new(
                    version.business_id,
                    parent.path.clone(),
                    timepoint,
                    version.content,
                )
                .with_promoted_from(version.version_id),
            );
        }

        let mut deletions = 0usize;
        for id in self.hidden_ids(&branch.tombstones)? {
            if promoted.contains(&id) {
                continue;
            }
            if let Some(existing) = parent_view
                .get(&id)
                .filter(|v| branch.tombstones.contains(&v.version_id))
            {
                hide_on_parent(&mut commit, existing);
                deletions += 1;
            }
        }

        let timepoint = commit.complete()?;
        info!(
            branch = %child,
            parent = %parent.path,
            %timepoint,
            promoted = promoted.len(),
            deletions,
            "Branch promoted"
        );
        Ok(SyncOutcome::Committed(timepoint))
    }

    /// Current versions authored on `path`
    fn own_current(&self, path: &BranchPath) -> VcResult<Vec<VersionedRecord<C>>> {
        Ok(self
            .records
            .on_branch(path)?
            .into_iter()
            .filter(VersionedRecord::is_current)
            .collect())
    }

    /// Business ids of the versions a tombstone set hides
    fn hidden_ids(&self, tombstones: &BTreeSet<VersionId>) -> VcResult<BTreeSet<BusinessId>> {
        let mut ids = BTreeSet::new();
        for id in tombstones {
            if let Some(version) = self.records.get(*id)? {
                ids.insert(version.business_id);
            }
        }
        Ok(ids)
    }

    /// Entities the child hides without writing its own version
    fn deleted_on_child(
        &self,
        child: &BranchPath,
        tombstones: &BTreeSet<VersionId>,
        view: &View<C>,
    ) -> VcResult<BTreeSet<BusinessId>> {
        Ok(self
            .hidden_ids(tombstones)?
            .into_iter()
            .filter(|id| !view.get(id).is_some_and(|v| &v.origin == child))
            .collect())
    }
}

fn check_rebased(child: &BranchPath, base: Timepoint, parent_head: Timepoint) -> VcResult<()> {
    if base == parent_head {
        Ok(())
    } else {
        Err(VcError::RebaseRequired {
            child: child.clone(),
            child_base: base,
            parent_head,
        })
    }
}

fn hide_on_parent<C: ContentComparable>(commit: &mut Commit<C>, existing: &VersionedRecord<C>) {
    if &existing.origin == commit.branch_path() {
        commit.end_version(existing.version_id);
    } else {
        commit.replace_version(existing.version_id);
    }
}
