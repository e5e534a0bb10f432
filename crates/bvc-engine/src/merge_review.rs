//! Merge reviews
//!
//! A [`MergeReview`] pairs the parent-to-child and child-to-parent reviews
//! of one branch pair. An entity is a conflict when it is in the changed set
//! of both reviews and the two sides' content differs. Each conflict carries
//! the configured strategy's automatic proposal (if it has one) and any
//! manual resolution submitted for it. Finalizing rebases the child with
//! every conflict resolved, manual resolutions taking precedence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bvc_merge::{MergeInput, MergeStrategy};
use bvc_model::{
    BranchPath, BranchReview, BusinessId, ContentComparable, ManuallyMergedEntity, MergeReview,
    MergeReviewId, ReviewStatus, Timepoint, VersionedRecord,
};
use bvc_store::ReviewStore;
use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, RebaseGuard, Resolution};
use crate::error::{VcError, VcResult};
use crate::registry::BranchRegistry;
use crate::review::ReviewEngine;
use crate::visibility::VisibilityResolver;

/// One entity edited differently on both branches
#[derive(Debug, Clone)]
pub struct MergeConflict<C> {
    /// Entity
    pub business_id: BusinessId,
    /// Version visible on the parent
    pub source_version: VersionedRecord<C>,
    /// Version visible on the child
    pub target_version: VersionedRecord<C>,
    /// Strategy proposal, when the edits combine mechanically
    pub auto_merged: Option<C>,
    /// Submitted manual resolution
    pub manually_merged: Option<Resolution<C>>,
}

impl<C: Clone> MergeConflict<C> {
    /// Resolution finalize would apply, manual first
    #[must_use]
    pub fn resolution(&self) -> Option<Resolution<C>> {
        self.manually_merged
            .clone()
            .or_else(|| self.auto_merged.clone().map(Resolution::Upsert))
    }
}

/// Creates, inspects and finalizes merge reviews
pub struct MergeReviewEngine<C: ContentComparable> {
    registry: BranchRegistry,
    resolver: VisibilityResolver<C>,
    reviews: ReviewEngine<C>,
    coordinator: Coordinator<C>,
    store: Arc<dyn ReviewStore>,
    strategy: Arc<dyn MergeStrategy<C>>,
}

impl<C: ContentComparable> Clone for MergeReviewEngine<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            resolver: self.resolver.clone(),
            reviews: self.reviews.clone(),
            coordinator: self.coordinator.clone(),
            store: Arc::clone(&self.store),
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<C: ContentComparable> std::fmt::Debug for MergeReviewEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeReviewEngine")
            .field("strategy", &self.strategy.name())
            .finish_non_exhaustive()
    }
}

impl<C: ContentComparable> MergeReviewEngine<C> {
    /// Engine proposing automatic merges with `strategy`
    #[must_use]
    pub fn new(
        registry: BranchRegistry,
        resolver: VisibilityResolver<C>,
        reviews: ReviewEngine<C>,
        coordinator: Coordinator<C>,
        store: Arc<dyn ReviewStore>,
        strategy: Arc<dyn MergeStrategy<C>>,
    ) -> Self {
        Self {
            registry,
            resolver,
            reviews,
            coordinator,
            store,
            strategy,
        }
    }

    /// Name of the automatic merge strategy
    #[inline]
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Review both directions between `source` (parent) and `target` (child)
    ///
    /// # Errors
    /// - [`VcError::NotParentChild`] unless `source` is `target`'s parent
    /// - [`VcError::BranchNotFound`] for unknown branches
    pub fn create_merge_review(
        &self,
        source: &BranchPath,
        target: &BranchPath,
    ) -> VcResult<MergeReview> {
        if !source.is_parent_of(target) {
            return Err(VcError::NotParentChild {
                source_path: source.clone(),
                target_path: target.clone(),
            });
        }
        let forward = self.reviews.create_review(source, target)?;
        let backward = self.reviews.create_review(target, source)?;

        let (status, message) = combined_status(&forward, &backward);
        let review = MergeReview {
            id: MergeReviewId::new(),
            source_path: source.clone(),
            target_path: target.clone(),
            source_to_target: forward.id,
            target_to_source: backward.id,
            status,
            message,
            created: self.registry.now(),
            applied: None,
        };
        self.store.save_merge_review(review.clone())?;
        info!(merge_review = %review.id, source = %source, target = %target, status = %review.status, "Merge review created");
        Ok(review)
    }

    /// Saved merge review, `STALE` if either branch review went stale
    ///
    /// # Errors
    /// [`VcError::MergeReviewNotFound`] for an unknown id
    pub fn get_merge_review(&self, id: MergeReviewId) -> VcResult<MergeReview> {
        let mut review = self.load(id)?;
        if review.applied.is_some() || review.status == ReviewStatus::Failed {
            return Ok(review);
        }
        let forward = self.reviews.get_review(review.source_to_target)?;
        let backward = self.reviews.get_review(review.target_to_source)?;
        let (status, message) = combined_status(&forward, &backward);
        if status != review.status {
            debug!(merge_review = %id, from = %review.status, to = %status, "Merge review status changed");
            review.status = status;
            review.message = message;
            self.store.save_merge_review(review.clone())?;
        }
        Ok(review)
    }

    /// Conflicts of a current merge review, in business id order
    ///
    /// # Errors
    /// - [`VcError::StaleReview`] if either branch moved
    /// - [`VcError::ReviewNotCurrent`] if a branch review failed
    /// - [`VcError::InvalidSnapshot`] if a stored manual merge no longer
    ///   decodes
    pub fn conflicts(&self, id: MergeReviewId) -> VcResult<Vec<MergeConflict<C>>> {
        let review = self.get_merge_review(id)?;
        require_current(&review)?;
        self.conflicts_of(&review).map(|(conflicts, _)| conflicts)
    }

    /// Record a manual resolution for one entity
    ///
    /// Submitting again for the same entity replaces the earlier resolution.
    ///
    /// # Errors
    /// - [`VcError::MergeReviewNotFound`] for an unknown id
    /// - [`VcError::InvalidSnapshot`] if `snapshot` is not valid content
    pub fn submit_manual_merge(
        &self,
        id: MergeReviewId,
        business_id: BusinessId,
        snapshot: serde_json::Value,
        deleted: bool,
    ) -> VcResult<ManuallyMergedEntity> {
        self.load(id)?;
        if !deleted {
            serde_json::from_value::<C>(snapshot.clone()).map_err(|source| {
                VcError::InvalidSnapshot {
                    business_id: business_id.clone(),
                    source,
                }
            })?;
        }
        let entity = ManuallyMergedEntity {
            merge_review_id: id,
            business_id,
            snapshot,
            deleted,
        };
        self.store.save_manual_merge(entity.clone())?;
        info!(merge_review = %id, business_id = %entity.business_id, deleted, "Manual merge submitted");
        Ok(entity)
    }

    /// Rebase the child with every conflict resolved
    ///
    /// Finalizing an applied merge review returns the original rebase
    /// timepoint without doing anything.
    ///
    /// # Errors
    /// - [`VcError::UnresolvedConflicts`] listing conflicts with neither an
    ///   automatic nor a manual resolution
    /// - [`VcError::UnexpectedManualMerge`] for manual merges of entities
    ///   that are not in conflict
    /// - [`VcError::StaleReview`] if either branch moved since the review
    /// - [`VcError::BranchLocked`] if the rebase could not lock the child
    pub fn finalize(&self, id: MergeReviewId) -> VcResult<Timepoint> {
        if let Some(applied) = self.load(id)?.applied {
            debug!(merge_review = %id, %applied, "Merge review already applied");
            return Ok(applied);
        }
        let mut review = self.get_merge_review(id)?;
        require_current(&review)?;

        let (conflicts, forward) = self.conflicts_of(&review)?;
        let conflicting: BTreeSet<&BusinessId> = conflicts.iter().map(|c| &c.business_id).collect();
        let unexpected: Vec<BusinessId> = self
            .store
            .manual_merges(id)?
            .into_iter()
            .map(|m| m.business_id)
            .filter(|b| !conflicting.contains(b))
            .collect();
        if !unexpected.is_empty() {
            return Err(VcError::UnexpectedManualMerge { ids: unexpected });
        }

        let mut resolutions = BTreeMap::new();
        let mut unresolved = Vec::new();
        for conflict in &conflicts {
            match conflict.resolution() {
                Some(resolution) => {
                    resolutions.insert(conflict.business_id.clone(), resolution);
                }
                None => unresolved.push(conflict.business_id.clone()),
            }
        }
        if !unresolved.is_empty() {
            warn!(merge_review = %id, unresolved = unresolved.len(), "Merge review has unresolved conflicts");
            return Err(VcError::UnresolvedConflicts { ids: unresolved });
        }

        let guard = RebaseGuard {
            review: id.to_string(),
            parent: forward.source.clone(),
            child: forward.target.clone(),
        };
        let resolved = resolutions.len();
        let outcome = self
            .coordinator
            .rebase_inner(&review.target_path, resolutions, Some(guard))?;
        let applied = match outcome.timepoint() {
            Some(tp) => tp,
            None => forward.target.head,
        };

        review.applied = Some(applied);
        self.store.save_merge_review(review.clone())?;
        info!(merge_review = %id, target = %review.target_path, %applied, resolved, "Merge review applied");
        Ok(applied)
    }

    fn load(&self, id: MergeReviewId) -> VcResult<MergeReview> {
        self.store
            .merge_review(id)?
            .ok_or(VcError::MergeReviewNotFound(id))
    }

    fn conflicts_of(&self, review: &MergeReview) -> VcResult<(Vec<MergeConflict<C>>, BranchReview)> {
        let forward = self.reviews.get_review(review.source_to_target)?;
        let backward = self.reviews.get_review(review.target_to_source)?;
        let changed = |r: &BranchReview| {
            r.changes
                .as_ref()
                .map(|c| c.changed.clone())
                .unwrap_or_default()
        };
        let both: BTreeSet<BusinessId> = changed(&forward)
            .intersection(&changed(&backward))
            .cloned()
            .collect();
        if both.is_empty() {
            return Ok((Vec::new(), forward));
        }

        let parent = &forward.source;
        let child = &forward.target;
        let parent_view = self.resolver.resolve_records(&parent.path, parent.head)?;
        let child_view = self.resolver.resolve_records(&child.path, child.head)?;
        let base_view = self.resolver.resolve_records(&parent.path, child.base)?;

        let mut manual: BTreeMap<BusinessId, ManuallyMergedEntity> = self
            .store
            .manual_merges(review.id)?
            .into_iter()
            .map(|m| (m.business_id.clone(), m))
            .collect();

        let mut conflicts = Vec::new();
        for id in both {
            let (Some(source_version), Some(target_version)) = (parent_view.get(&id), child_view.get(&id)) else {
                continue;
            };
            if !source_version.content.is_content_changed(&target_version.content) {
                continue;
            }
            let auto_merged = self
                .strategy
                .merge(MergeInput {
                    base: base_view.get(&id).map(|v| &v.content),
                    source: &source_version.content,
                    target: &target_version.content,
                })
                .merged();
            let manually_merged = manual.remove(&id).map(decode_manual).transpose()?;
            conflicts.push(MergeConflict {
                business_id: id,
                source_version: source_version.clone(),
                target_version: target_version.clone(),
                auto_merged,
                manually_merged,
            });
        }
        Ok((conflicts, forward))
    }
}

fn decode_manual<C: ContentComparable>(entity: ManuallyMergedEntity) -> VcResult<Resolution<C>> {
    if entity.deleted {
        return Ok(Resolution::Delete);
    }
    serde_json::from_value(entity.snapshot)
        .map(Resolution::Upsert)
        .map_err(|source| VcError::InvalidSnapshot {
            business_id: entity.business_id,
            source,
        })
}

fn combined_status(forward: &BranchReview, backward: &BranchReview) -> (ReviewStatus, Option<String>) {
    for review in [forward, backward] {
        if review.status == ReviewStatus::Failed {
            return (ReviewStatus::Failed, review.message.clone());
        }
    }
    for review in [forward, backward] {
        if review.status == ReviewStatus::Stale {
            return (ReviewStatus::Stale, Some(format!("review {} is stale", review.id)));
        }
    }
    if forward.status == ReviewStatus::Current && backward.status == ReviewStatus::Current {
        (ReviewStatus::Current, None)
    } else {
        (ReviewStatus::Pending, None)
    }
}

fn require_current(review: &MergeReview) -> VcResult<()> {
    match review.status {
        ReviewStatus::Current => Ok(()),
        ReviewStatus::Stale => Err(VcError::StaleReview {
            id: review.id.to_string(),
        }),
        status => Err(VcError::ReviewNotCurrent {
            id: review.id.to_string(),
            status,
        }),
    }
}
