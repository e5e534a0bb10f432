//! Tombstone compaction
//!
//! Tombstones only ever grow on the commit path. [`TombstoneCompactor`] is
//! the out-of-band pass that drops the ones that can no longer hide
//! anything from the branch:
//!
//! - the version no longer exists
//! - the version was not authored on an ancestor
//! - the version ended at or before the cutoff at which the branch reads
//!   the ancestor that authored it
//!
//! Cutoffs only move forward (rebases raise the base), so a tombstone that
//! is useless now stays useless. Compaction rewrites the current timespan
//! in place and leaves head alone, so the branch's view and any reviews of
//! it are unaffected.

use std::collections::BTreeMap;
use std::sync::Arc;

use bvc_model::{BranchLock, BranchPath, BranchRecord, ContentComparable, Timepoint, VersionId};
use bvc_store::RecordStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{VcError, VcResult};
use crate::registry::BranchRegistry;

/// What a compaction pass removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    /// Compacted branch
    pub path: BranchPath,
    /// Tombstones left in place
    pub kept: usize,
    /// Tombstones removed
    pub removed: Vec<VersionId>,
}

/// Removes tombstones that no longer affect visibility
pub struct TombstoneCompactor<C> {
    registry: BranchRegistry,
    records: Arc<dyn RecordStore<C>>,
}

impl<C> Clone for TombstoneCompactor<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            records: Arc::clone(&self.records),
        }
    }
}

impl<C> std::fmt::Debug for TombstoneCompactor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneCompactor").finish_non_exhaustive()
    }
}

impl<C: ContentComparable> TombstoneCompactor<C> {
    /// Compactor over the engine stores
    #[must_use]
    pub fn new(registry: BranchRegistry, records: Arc<dyn RecordStore<C>>) -> Self {
        Self { registry, records }
    }

    /// Compact the tombstones of `path` under a maintenance lock
    ///
    /// # Errors
    /// - [`VcError::RootBranch`] for a root, which never has tombstones
    /// - [`VcError::BranchLocked`] if a commit holds the branch
    pub fn compact(&self, path: &BranchPath) -> VcResult<CompactionReport> {
        if path.is_root() {
            return Err(VcError::RootBranch { path: path.clone() });
        }
        let seen = self.registry.get(path)?;
        let lock = BranchLock::maintenance(
            seen.value.next_timepoint(self.registry.now()),
            "tombstone compaction",
        );
        let locked = self.registry.try_lock(&seen, lock.clone())?;

        let removed = match self.useless_tombstones(&locked.value) {
            Ok(removed) => removed,
            Err(e) => {
                self.registry.release(path, &lock)?;
                return Err(e);
            }
        };
        let updated = self.registry.update_locked(path, &lock, |b| {
            for id in &removed {
                b.tombstones.remove(id);
            }
            b.lock = None;
        })?;

        info!(
            branch = %path,
            kept = updated.value.tombstones.len(),
            removed = removed.len(),
            "Tombstones compacted"
        );
        Ok(CompactionReport {
            path: path.clone(),
            kept: updated.value.tombstones.len(),
            removed,
        })
    }

    fn useless_tombstones(&self, branch: &BranchRecord) -> VcResult<Vec<VersionId>> {
        let cutoffs = self.ancestor_cutoffs(branch)?;
        let mut removed = Vec::new();
        for id in &branch.tombstones {
            let useless = match self.records.get(*id)? {
                None => true,
                Some(version) => match cutoffs.get(&version.origin) {
                    None => true,
                    Some(cutoff) => version.end.is_some_and(|end| end <= *cutoff),
                },
            };
            if useless {
                debug!(branch = %branch.path, version = %id, "Tombstone no longer needed");
                removed.push(*id);
            }
        }
        Ok(removed)
    }

    /// Cutoff at which `branch` reads each ancestor, as the resolver walks it
    fn ancestor_cutoffs(&self, branch: &BranchRecord) -> VcResult<BTreeMap<BranchPath, Timepoint>> {
        let mut cutoffs = BTreeMap::new();
        let mut cutoff = branch.base;
        for ancestor in branch.path.ancestors() {
            let span = self.registry.timespan_at(&ancestor, cutoff)?;
            cutoffs.insert(ancestor, cutoff.min(span.head));
            cutoff = span.base;
        }
        Ok(cutoffs)
    }
}
