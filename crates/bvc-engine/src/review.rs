//! Branch reviews
//!
//! A [`BranchReview`] is a one-directional diff between a parent and child:
//! which entities the target would gain (new), see differently (changed) or
//! lose (deleted) if the source's side were applied. Reviews are snapshots
//! of both branches' `(base, head)`; any commit on either side makes the
//! review stale, which [`ReviewEngine::get_review`] detects.
//!
//! Only entities touched by the source side are classified:
//! - parent to child: entities whose parent version changed since the
//!   child's base
//! - child to parent: entities the child wrote or hid since it was last
//!   rebased or promoted

use std::collections::BTreeSet;
use std::sync::Arc;

use bvc_model::{
    BranchPath, BranchRecord, BranchReview, BusinessId, ContentComparable, ReviewChanges, ReviewId,
    ReviewStatus,
};
use bvc_store::{RecordStore, ReviewStore};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{VcError, VcResult};
use crate::registry::BranchRegistry;
use crate::visibility::VisibilityResolver;

/// Review returned by [`ReviewEngine::spawn_review`]
#[derive(Debug)]
pub struct PendingReview {
    /// Review as first saved (`PENDING`, or a reused computed review)
    pub review: BranchReview,
    handle: Option<JoinHandle<VcResult<BranchReview>>>,
}

impl PendingReview {
    /// Check if the computation already finished when spawned
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.handle.is_none()
    }

    /// Wait for the computed review
    ///
    /// # Errors
    /// [`VcError::TaskFailed`] if the background task panicked or was
    /// aborted, otherwise store failures
    pub async fn wait(self) -> VcResult<BranchReview> {
        match self.handle {
            None => Ok(self.review),
            Some(handle) => handle
                .await
                .map_err(|e| VcError::TaskFailed(e.to_string()))?,
        }
    }
}

/// Computes and caches branch reviews
pub struct ReviewEngine<C> {
    registry: BranchRegistry,
    records: Arc<dyn RecordStore<C>>,
    resolver: VisibilityResolver<C>,
    store: Arc<dyn ReviewStore>,
    workers: Arc<Semaphore>,
}

impl<C> Clone for ReviewEngine<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            records: Arc::clone(&self.records),
            resolver: self.resolver.clone(),
            store: Arc::clone(&self.store),
            workers: Arc::clone(&self.workers),
        }
    }
}

impl<C> std::fmt::Debug for ReviewEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewEngine")
            .field("available_workers", &self.workers.available_permits())
            .finish_non_exhaustive()
    }
}

impl<C: ContentComparable> ReviewEngine<C> {
    /// Engine allowing `workers` concurrent background computations
    #[must_use]
    pub fn new(
        registry: BranchRegistry,
        records: Arc<dyn RecordStore<C>>,
        resolver: VisibilityResolver<C>,
        store: Arc<dyn ReviewStore>,
        workers: usize,
    ) -> Self {
        Self {
            registry,
            records,
            resolver,
            store,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Review of `source` into `target`, computed synchronously
    ///
    /// A saved review of exactly the live branch states is reused unless it
    /// failed.
    ///
    /// # Errors
    /// - [`VcError::NotParentChild`] unless one branch is the other's parent
    /// - [`VcError::BranchNotFound`] for unknown branches
    pub fn create_review(&self, source: &BranchPath, target: &BranchPath) -> VcResult<BranchReview> {
        self.create_review_cancellable(source, target, &CancellationToken::new())
    }

    /// As [`Self::create_review`], stopping early when `token` is cancelled
    ///
    /// A cancelled review is saved as `FAILED` with message `cancelled`.
    ///
    /// # Errors
    /// As [`Self::create_review`]
    pub fn create_review_cancellable(
        &self,
        source: &BranchPath,
        target: &BranchPath,
        token: &CancellationToken,
    ) -> VcResult<BranchReview> {
        match self.prepare(source, target)? {
            Prepared::Reused(review) => Ok(review),
            Prepared::Pending(review) => self.compute(review, token),
        }
    }

    /// Save a `PENDING` review and compute it on a blocking task
    ///
    /// At most `review_workers` computations run at once; the rest wait for
    /// a permit.
    ///
    /// # Errors
    /// As [`Self::create_review`], plus [`VcError::TaskFailed`] outside a
    /// tokio runtime
    pub fn spawn_review(
        &self,
        source: &BranchPath,
        target: &BranchPath,
        token: CancellationToken,
    ) -> VcResult<PendingReview> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| VcError::TaskFailed(e.to_string()))?;
        let review = match self.prepare(source, target)? {
            Prepared::Reused(review) => {
                return Ok(PendingReview {
                    review,
                    handle: None,
                })
            }
            Prepared::Pending(review) => review,
        };

        let engine = self.clone();
        let pending = review.clone();
        let handle = runtime.spawn(async move {
            let _permit = Arc::clone(&engine.workers)
                .acquire_owned()
                .await
                .map_err(|e| VcError::TaskFailed(e.to_string()))?;
            tokio::task::spawn_blocking(move || engine.compute(pending, &token))
                .await
                .map_err(|e| VcError::TaskFailed(e.to_string()))?
        });
        debug!(review = %review.id, "Review scheduled");
        Ok(PendingReview {
            review,
            handle: Some(handle),
        })
    }

    /// Saved review, marked `STALE` if either branch moved
    ///
    /// # Errors
    /// [`VcError::ReviewNotFound`] for an unknown id
    pub fn get_review(&self, id: ReviewId) -> VcResult<BranchReview> {
        let mut review = self.store.review(id)?.ok_or(VcError::ReviewNotFound(id))?;
        if matches!(review.status, ReviewStatus::Failed | ReviewStatus::Stale) {
            return Ok(review);
        }
        if self.is_outdated(&review)? {
            info!(review = %id, source = %review.source.path, target = %review.target.path, "Review is stale");
            review.status = ReviewStatus::Stale;
            review.last_updated = self.registry.now();
            self.store.save_review(review.clone())?;
        }
        Ok(review)
    }

    fn is_outdated(&self, review: &BranchReview) -> VcResult<bool> {
        for state in [&review.source, &review.target] {
            match self.registry.find(&state.path)? {
                Some(live) if !state.is_outdated_by(&live) => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    fn prepare(&self, source: &BranchPath, target: &BranchPath) -> VcResult<Prepared> {
        let source_is_parent = source.is_parent_of(target);
        if !source_is_parent && !target.is_parent_of(source) {
            return Err(VcError::NotParentChild {
                source_path: source.clone(),
                target_path: target.clone(),
            });
        }
        let source_state = self.registry.get(source)?.value.state();
        let target_state = self.registry.get(target)?.value.state();

        if let Some(existing) = self.store.find_review(&source_state, &target_state)? {
            if existing.status != ReviewStatus::Failed {
                debug!(review = %existing.id, "Reusing review");
                return Ok(Prepared::Reused(existing));
            }
        }

        let review = BranchReview::pending(source_state, target_state, source_is_parent, self.registry.now());
        self.store.save_review(review.clone())?;
        Ok(Prepared::Pending(review))
    }

    fn compute(&self, mut review: BranchReview, token: &CancellationToken) -> VcResult<BranchReview> {
        match self.classify(&review, token) {
            Ok(changes) => {
                info!(
                    review = %review.id,
                    source = %review.source.path,
                    target = %review.target.path,
                    new = changes.new.len(),
                    changed = changes.changed.len(),
                    deleted = changes.deleted.len(),
                    "Review computed"
                );
                review.status = ReviewStatus::Current;
                review.changes = Some(changes);
                review.message = None;
            }
            Err(VcError::Cancelled) => {
                warn!(review = %review.id, "Review cancelled");
                review.status = ReviewStatus::Failed;
                review.message = Some("cancelled".to_string());
            }
            Err(e) => {
                error!(review = %review.id, error = %e, "Review failed");
                review.status = ReviewStatus::Failed;
                review.message = Some(e.to_string());
            }
        }
        review.last_updated = self.registry.now();
        self.store.save_review(review.clone())?;
        Ok(review)
    }

    fn classify(&self, review: &BranchReview, token: &CancellationToken) -> VcResult<ReviewChanges> {
        let source = &review.source;
        let target = &review.target;
        let touched = if review.source_is_parent {
            self.resolver
                .changes_between(&source.path, target.base, source.head, token)?
                .into_keys()
                .collect()
        } else {
            let branch = self.registry.get(&source.path)?.value;
            self.touched_on_child(&branch)?
        };
        token.check()?;

        let source_view = self
            .resolver
            .resolve_cancellable(&source.path, source.head, token)?;
        let target_view = self
            .resolver
            .resolve_cancellable(&target.path, target.head, token)?;

        let mut changes = ReviewChanges::default();
        for id in touched {
            token.check()?;
            match (source_view.get(&id), target_view.get(&id)) {
                (Some(_), None) => {
                    changes.new.insert(id);
                }
                (None, Some(_)) => {
                    changes.deleted.insert(id);
                }
                (Some(s), Some(t))
                    if s.version_id != t.version_id && s.content.is_content_changed(&t.content) =>
                {
                    changes.changed.insert(id);
                }
                _ => {}
            }
        }
        Ok(changes)
    }

    /// Entities a child wrote or hid since its last rebase or promotion
    fn touched_on_child(&self, branch: &BranchRecord) -> VcResult<BTreeSet<BusinessId>> {
        let mut touched: BTreeSet<BusinessId> = self
            .records
            .on_branch(&branch.path)?
            .into_iter()
            .filter(|v| v.is_current() && v.start <= branch.head)
            .map(|v| v.business_id)
            .collect();
        for id in &branch.tombstones {
            if let Some(version) = self.records.get(*id)? {
                touched.insert(version.business_id);
            }
        }
        Ok(touched)
    }
}

enum Prepared {
    Reused(BranchReview),
    Pending(BranchReview),
}
