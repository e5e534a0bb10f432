//! Review persistence

use std::collections::HashMap;

use bvc_model::{
    BranchReview, BranchState, BusinessId, ManuallyMergedEntity, MergeReview, MergeReviewId,
    ReviewId,
};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::StoreError;

/// Durable branch reviews, merge reviews and manual merges
pub trait ReviewStore: Send + Sync {
    /// Insert or replace a branch review
    ///
    /// # Errors
    /// Backend failures only
    fn save_review(&self, review: BranchReview) -> Result<(), StoreError>;

    /// Branch review by id
    ///
    /// # Errors
    /// Backend failures only
    fn review(&self, id: ReviewId) -> Result<Option<BranchReview>, StoreError>;

    /// Most recently saved review for exactly this pair of snapshots
    ///
    /// # Errors
    /// Backend failures only
    fn find_review(
        &self,
        source: &BranchState,
        target: &BranchState,
    ) -> Result<Option<BranchReview>, StoreError>;

    /// Insert or replace a merge review
    ///
    /// # Errors
    /// Backend failures only
    fn save_merge_review(&self, review: MergeReview) -> Result<(), StoreError>;

    /// Merge review by id
    ///
    /// # Errors
    /// Backend failures only
    fn merge_review(&self, id: MergeReviewId) -> Result<Option<MergeReview>, StoreError>;

    /// Insert or replace the manual merge for `(merge_review_id, business_id)`
    ///
    /// # Errors
    /// Backend failures only
    fn save_manual_merge(&self, entity: ManuallyMergedEntity) -> Result<(), StoreError>;

    /// All manual merges of a merge review, ordered by business id
    ///
    /// # Errors
    /// Backend failures only
    fn manual_merges(&self, id: MergeReviewId) -> Result<Vec<ManuallyMergedEntity>, StoreError>;
}

/// In-memory [`ReviewStore`]
#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    reviews: DashMap<ReviewId, BranchReview>,
    by_states: RwLock<HashMap<(BranchState, BranchState), ReviewId>>,
    merge_reviews: DashMap<MergeReviewId, MergeReview>,
    manual: DashMap<(MergeReviewId, BusinessId), ManuallyMergedEntity>,
}

impl MemoryReviewStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewStore for MemoryReviewStore {
    fn save_review(&self, review: BranchReview) -> Result<(), StoreError> {
        self.by_states
            .write()
            .insert((review.source.clone(), review.target.clone()), review.id);
        self.reviews.insert(review.id, review);
        Ok(())
    }

    fn review(&self, id: ReviewId) -> Result<Option<BranchReview>, StoreError> {
        Ok(self.reviews.get(&id).map(|r| r.clone()))
    }

    fn find_review(
        &self,
        source: &BranchState,
        target: &BranchState,
    ) -> Result<Option<BranchReview>, StoreError> {
        let id = self
            .by_states
            .read()
            .get(&(source.clone(), target.clone()))
            .copied();
        Ok(id.and_then(|id| self.reviews.get(&id).map(|r| r.clone())))
    }

    fn save_merge_review(&self, review: MergeReview) -> Result<(), StoreError> {
        self.merge_reviews.insert(review.id, review);
        Ok(())
    }

    fn merge_review(&self, id: MergeReviewId) -> Result<Option<MergeReview>, StoreError> {
        Ok(self.merge_reviews.get(&id).map(|r| r.clone()))
    }

    fn save_manual_merge(&self, entity: ManuallyMergedEntity) -> Result<(), StoreError> {
        self.manual.insert(
            (entity.merge_review_id, entity.business_id.clone()),
            entity,
        );
        Ok(())
    }

    fn manual_merges(&self, id: MergeReviewId) -> Result<Vec<ManuallyMergedEntity>, StoreError> {
        let mut found: Vec<_> = self
            .manual
            .iter()
            .filter(|entry| entry.key().0 == id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.business_id.cmp(&b.business_id));
        Ok(found)
    }
}
