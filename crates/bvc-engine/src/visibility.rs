//! Point-in-time visibility
//!
//! [`VisibilityResolver`] answers "which version of each entity does branch
//! B see at time T". The walk is:
//!
//! 1. Find B's timespan at T. Admit B's own versions live at that span's head.
//! 2. Move to the parent P, reading P's timespan at B's base. Admit P's
//!    versions live at that cutoff, unless masked by a tombstone collected so
//!    far. Add P's tombstones to the mask.
//! 3. Repeat with P's base until the root has been read.
//!
//! A branch therefore only inherits ancestor content that existed as of its
//! own base, and a version is hidden by a tombstone on any branch between
//! its origin and the queried branch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bvc_model::{BranchPath, BusinessId, ContentComparable, Timepoint, VersionId, VersionedRecord};
use bvc_store::RecordStore;
use tracing::{debug, error};

use crate::cancel::CancellationToken;
use crate::error::{VcError, VcResult};
use crate::registry::BranchRegistry;

/// Resolved view: one version per business id
pub type View<C> = BTreeMap<BusinessId, VersionedRecord<C>>;

/// Difference between two views of the same branch
#[derive(Debug, Clone)]
pub struct ViewChange<C> {
    /// Version visible at the earlier timepoint
    pub before: Option<VersionedRecord<C>>,
    /// Version visible at the later timepoint
    pub after: Option<VersionedRecord<C>>,
}

/// Temporal query engine over branch lineages
pub struct VisibilityResolver<C> {
    registry: BranchRegistry,
    records: Arc<dyn RecordStore<C>>,
    max_depth: usize,
}

impl<C> Clone for VisibilityResolver<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            records: Arc::clone(&self.records),
            max_depth: self.max_depth,
        }
    }
}

impl<C> std::fmt::Debug for VisibilityResolver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityResolver")
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl<C: ContentComparable> VisibilityResolver<C> {
    /// Resolver bounded to `max_depth` ancestor levels
    #[must_use]
    pub fn new(registry: BranchRegistry, records: Arc<dyn RecordStore<C>>, max_depth: usize) -> Self {
        Self {
            registry,
            records,
            max_depth,
        }
    }

    /// Version id visible for every entity on `path` at `at`
    ///
    /// # Errors
    /// - [`VcError::BranchNotFoundAt`] if the branch did not exist at `at`
    /// - [`VcError::VisibilityInvariantViolation`] on a collision
    /// - [`VcError::AncestryTooDeep`] if the lineage exceeds the bound
    pub fn resolve(&self, path: &BranchPath, at: Timepoint) -> VcResult<BTreeMap<BusinessId, VersionId>> {
        Ok(self
            .resolve_records(path, at)?
            .into_iter()
            .map(|(id, v)| (id, v.version_id))
            .collect())
    }

    /// Visible versions with content
    ///
    /// # Errors
    /// As [`Self::resolve`]
    pub fn resolve_records(&self, path: &BranchPath, at: Timepoint) -> VcResult<View<C>> {
        self.resolve_cancellable(path, at, &CancellationToken::new())
    }

    /// Visible versions at the branch's current head
    ///
    /// # Errors
    /// As [`Self::resolve`]
    pub fn resolve_head(&self, path: &BranchPath) -> VcResult<View<C>> {
        let head = self.registry.get(path)?.value.head;
        self.resolve_records(path, head)
    }

    /// Visible versions, stopping early when `token` is cancelled
    ///
    /// # Errors
    /// As [`Self::resolve`], plus [`VcError::Cancelled`]
    pub fn resolve_cancellable(
        &self,
        path: &BranchPath,
        at: Timepoint,
        token: &CancellationToken,
    ) -> VcResult<View<C>> {
        let span = self.registry.timespan_at(path, at)?;
        let mut view = View::new();

        for version in self.records.live_on_branch(path, span.head.min(at))? {
            admit(&mut view, path, version)?;
        }

        let mut masked: BTreeSet<VersionId> = span.tombstones;
        let mut cutoff = span.base;
        let mut depth = 0;

        for ancestor in path.ancestors() {
            token.check()?;
            depth += 1;
            if depth > self.max_depth {
                error!(branch = %path, max_depth = self.max_depth, "Ancestor walk exceeded bound");
                return Err(VcError::AncestryTooDeep {
                    path: path.clone(),
                    max_depth: self.max_depth,
                });
            }

            let ancestor_span = self.registry.timespan_at(&ancestor, cutoff)?;
            let ancestor_cutoff = cutoff.min(ancestor_span.head);
            for version in self.records.live_on_branch(&ancestor, ancestor_cutoff)? {
                if !masked.contains(&version.version_id) {
                    admit(&mut view, path, version)?;
                }
            }

            masked.extend(ancestor_span.tombstones);
            cutoff = ancestor_span.base;
        }

        debug!(branch = %path, timepoint = %at, visible = view.len(), "Resolved view");
        Ok(view)
    }

    /// Entities whose visible version on `path` differs between `from` and `to`
    ///
    /// # Errors
    /// As [`Self::resolve_cancellable`]
    pub fn changes_between(
        &self,
        path: &BranchPath,
        from: Timepoint,
        to: Timepoint,
        token: &CancellationToken,
    ) -> VcResult<BTreeMap<BusinessId, ViewChange<C>>> {
        let mut before = self.resolve_cancellable(path, from, token)?;
        let after = self.resolve_cancellable(path, to, token)?;
        let mut changes = BTreeMap::new();

        for (id, now) in after {
            let then = before.remove(&id);
            if then.as_ref().map(|v| v.version_id) != Some(now.version_id) {
                changes.insert(
                    id,
                    ViewChange {
                        before: then,
                        after: Some(now),
                    },
                );
            }
        }
        for (id, gone) in before {
            changes.insert(
                id,
                ViewChange {
                    before: Some(gone),
                    after: None,
                },
            );
        }
        Ok(changes)
    }
}

fn admit<C>(view: &mut View<C>, path: &BranchPath, version: VersionedRecord<C>) -> VcResult<()> {
    if let Some(existing) = view.get(&version.business_id) {
        error!(
            branch = %path,
            business_id = %version.business_id,
            first = %existing.version_id,
            second = %version.version_id,
            "Visibility invariant violated"
        );
        return Err(VcError::VisibilityInvariantViolation {
            path: path.clone(),
            business_id: version.business_id.clone(),
            first: existing.version_id,
            second: version.version_id,
        });
    }
    view.insert(version.business_id.clone(), version);
    Ok(())
}
