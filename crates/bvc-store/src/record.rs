//! Record version persistence
//!
//! [`RecordStore`] holds every [`VersionedRecord`] ever written, indexed by
//! version id and by origin branch. Versions are append-only apart from
//! setting `end`, and from [`RecordStore::rollback`] which undoes exactly
//! one failed commit.

use bvc_model::{BranchPath, Timepoint, VersionId, VersionedRecord};
use dashmap::DashMap;

use crate::error::StoreError;

/// What a rollback undid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Versions written by the commit and removed
    pub removed: usize,
    /// Versions the commit had ended and that are current again
    pub reopened: usize,
}

/// Durable record versions
pub trait RecordStore<C>: Send + Sync {
    /// Insert new versions
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`] if any version id is taken; nothing is
    /// inserted in that case
    fn insert(&self, versions: Vec<VersionedRecord<C>>) -> Result<(), StoreError>;

    /// Set `end = at` on each listed version
    ///
    /// # Errors
    /// [`StoreError::NotFound`] or [`StoreError::AlreadyEnded`]; nothing is
    /// changed in that case
    fn end(&self, ids: &[VersionId], at: Timepoint) -> Result<(), StoreError>;

    /// Version by id
    ///
    /// # Errors
    /// Backend failures only
    fn get(&self, id: VersionId) -> Result<Option<VersionedRecord<C>>, StoreError>;

    /// All versions authored on `path`, ordered by start
    ///
    /// # Errors
    /// Backend failures only
    fn on_branch(&self, path: &BranchPath) -> Result<Vec<VersionedRecord<C>>, StoreError>;

    /// Versions authored on `path` that are live at `cutoff`
    ///
    /// # Errors
    /// Backend failures only
    fn live_on_branch(
        &self,
        path: &BranchPath,
        cutoff: Timepoint,
    ) -> Result<Vec<VersionedRecord<C>>, StoreError> {
        Ok(self
            .on_branch(path)?
            .into_iter()
            .filter(|v| v.is_live_at(cutoff))
            .collect())
    }

    /// Undo the commit stamped `at` on `path`
    ///
    /// Removes versions authored on `path` with `start == at` and clears
    /// `end` on versions authored on `path` with `end == at`.
    ///
    /// # Errors
    /// Backend failures only
    fn rollback(&self, path: &BranchPath, at: Timepoint) -> Result<RollbackSummary, StoreError>;
}

/// In-memory [`RecordStore`]
#[derive(Debug)]
pub struct MemoryRecordStore<C> {
    versions: DashMap<VersionId, VersionedRecord<C>>,
    by_branch: DashMap<BranchPath, Vec<VersionId>>,
}

impl<C> Default for MemoryRecordStore<C> {
    fn default() -> Self {
        Self {
            versions: DashMap::new(),
            by_branch: DashMap::new(),
        }
    }
}

impl<C> MemoryRecordStore<C> {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored versions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether nothing has been written
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl<C: Clone + Send + Sync> RecordStore<C> for MemoryRecordStore<C> {
    fn insert(&self, versions: Vec<VersionedRecord<C>>) -> Result<(), StoreError> {
        if let Some(taken) = versions
            .iter()
            .find(|v| self.versions.contains_key(&v.version_id))
        {
            return Err(StoreError::AlreadyExists {
                kind: "version",
                key: taken.version_id.to_string(),
            });
        }
        for version in versions {
            self.by_branch
                .entry(version.origin.clone())
                .or_default()
                .push(version.version_id);
            self.versions.insert(version.version_id, version);
        }
        Ok(())
    }

    fn end(&self, ids: &[VersionId], at: Timepoint) -> Result<(), StoreError> {
        for id in ids {
            let version = self
                .versions
                .get(id)
                .ok_or_else(|| StoreError::not_found("version", id))?;
            if version.end.is_some() {
                return Err(StoreError::AlreadyEnded(*id));
            }
        }
        for id in ids {
            if let Some(mut version) = self.versions.get_mut(id) {
                version.end = Some(at);
            }
        }
        Ok(())
    }

    fn get(&self, id: VersionId) -> Result<Option<VersionedRecord<C>>, StoreError> {
        Ok(self.versions.get(&id).map(|v| v.clone()))
    }

    fn on_branch(&self, path: &BranchPath) -> Result<Vec<VersionedRecord<C>>, StoreError> {
        let Some(ids) = self.by_branch.get(path) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<_> = ids
            .iter()
            .filter_map(|id| self.versions.get(id).map(|v| v.clone()))
            .collect();
        found.sort_by(|a, b| (a.start, a.version_id).cmp(&(b.start, b.version_id)));
        Ok(found)
    }

    fn rollback(&self, path: &BranchPath, at: Timepoint) -> Result<RollbackSummary, StoreError> {
        let mut summary = RollbackSummary::default();
        let Some(mut ids) = self.by_branch.get_mut(path) else {
            return Ok(summary);
        };
        ids.retain(|id| {
            let written_by_commit = self.versions.get(id).is_some_and(|v| v.start == at);
            if written_by_commit {
                self.versions.remove(id);
                summary.removed += 1;
            }
            !written_by_commit
        });
        for id in ids.iter() {
            if let Some(mut version) = self.versions.get_mut(id) {
                if version.end == Some(at) {
                    version.end = None;
                    summary.reopened += 1;
                }
            }
        }
        tracing::debug!(
            branch = %path,
            timepoint = %at,
            removed = summary.removed,
            reopened = summary.reopened,
            "Rolled back commit writes"
        );
        Ok(summary)
    }
}
