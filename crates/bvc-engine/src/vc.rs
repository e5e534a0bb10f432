//! Engine facade
//!
//! [`VersionControl`] wires the registry, resolver, commit manager,
//! coordinator and review engines over one set of stores and exposes the
//! engine's operations in one place. It is cheap to clone; clones share
//! the stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use bvc_merge::{MergeStrategy, StrategyRegistry};
use bvc_model::{
    BranchLock, BranchPath, BranchRecord, BranchReview, BranchTimespan, BusinessId, Clock, CommitType,
    ContentComparable, ManuallyMergedEntity, MergeReview, MergeReviewId, ReviewId, SyncState,
    SystemClock, Timepoint, VersionId,
};
use bvc_store::{
    BranchStore, MemoryBranchStore, MemoryRecordStore, MemoryReviewStore, RecordStore, ReviewStore,
};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::commit::{Commit, CommitManager, RolledBackCommit};
use crate::compaction::{CompactionReport, TombstoneCompactor};
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, Resolution, SyncOutcome};
use crate::error::{VcError, VcResult};
use crate::jobs::{MergeJob, MergeJobId, MergeJobTracker};
use crate::merge_review::{MergeConflict, MergeReviewEngine};
use crate::registry::BranchRegistry;
use crate::review::{PendingReview, ReviewEngine};
use crate::visibility::{View, VisibilityResolver};

/// Builder for [`VersionControl`]
///
/// Defaults to in-memory stores, the system clock and the built-in merge
/// strategies.
pub struct VersionControlBuilder<C: ContentComparable> {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    branches: Arc<dyn BranchStore>,
    records: Arc<dyn RecordStore<C>>,
    reviews: Arc<dyn ReviewStore>,
    strategies: StrategyRegistry<C>,
}

impl<C: ContentComparable> Default for VersionControlBuilder<C> {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            branches: Arc::new(MemoryBranchStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
            reviews: Arc::new(MemoryReviewStore::new()),
            strategies: StrategyRegistry::with_defaults(),
        }
    }
}

impl<C: ContentComparable> std::fmt::Debug for VersionControlBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionControlBuilder")
            .field("config", &self.config)
            .field("strategies", &self.strategies.names())
            .finish_non_exhaustive()
    }
}

impl<C: ContentComparable> VersionControlBuilder<C> {
    /// Set configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set clock
    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set branch store
    #[inline]
    #[must_use]
    pub fn with_branch_store(mut self, store: Arc<dyn BranchStore>) -> Self {
        self.branches = store;
        self
    }

    /// Set record store
    #[inline]
    #[must_use]
    pub fn with_record_store(mut self, store: Arc<dyn RecordStore<C>>) -> Self {
        self.records = store;
        self
    }

    /// Set review store
    #[inline]
    #[must_use]
    pub fn with_review_store(mut self, store: Arc<dyn ReviewStore>) -> Self {
        self.reviews = store;
        self
    }

    /// Register an additional merge strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn MergeStrategy<C>>) -> Self {
        self.strategies.register(strategy);
        self
    }

    /// Validate configuration and assemble the engine
    ///
    /// # Errors
    /// [`VcError::Config`] for invalid configuration or an unknown merge
    /// strategy name
    pub fn build(self) -> VcResult<VersionControl<C>> {
        self.config.validate()?;
        let strategy = self
            .strategies
            .get(&self.config.merge_strategy)
            .map_err(|e| VcError::Config(format!("merge_strategy: {e}")))?;

        let registry = BranchRegistry::new(self.branches, self.clock);
        let resolver = VisibilityResolver::new(
            registry.clone(),
            Arc::clone(&self.records),
            self.config.max_branch_depth,
        );
        let commits = CommitManager::new(registry.clone(), Arc::clone(&self.records), resolver.clone());
        let coordinator = Coordinator::new(
            registry.clone(),
            Arc::clone(&self.records),
            resolver.clone(),
            commits.clone(),
        );
        let reviews = ReviewEngine::new(
            registry.clone(),
            Arc::clone(&self.records),
            resolver.clone(),
            Arc::clone(&self.reviews),
            self.config.review_workers,
        );
        let merges = MergeReviewEngine::new(
            registry.clone(),
            resolver.clone(),
            reviews.clone(),
            coordinator.clone(),
            self.reviews,
            strategy,
        );
        let compactor = TombstoneCompactor::new(registry.clone(), self.records);

        debug!(
            root = %self.config.root_path,
            max_branch_depth = self.config.max_branch_depth,
            strategy = merges.strategy_name(),
            "Engine assembled"
        );
        Ok(VersionControl {
            config: self.config,
            registry,
            resolver,
            commits,
            coordinator,
            reviews,
            merges,
            compactor,
            jobs: Arc::new(MergeJobTracker::new()),
        })
    }
}

/// Branch-scoped temporal version control
pub struct VersionControl<C: ContentComparable> {
    config: EngineConfig,
    registry: BranchRegistry,
    resolver: VisibilityResolver<C>,
    commits: CommitManager<C>,
    coordinator: Coordinator<C>,
    reviews: ReviewEngine<C>,
    merges: MergeReviewEngine<C>,
    compactor: TombstoneCompactor<C>,
    jobs: Arc<MergeJobTracker>,
}

impl<C: ContentComparable> Clone for VersionControl<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry: self.registry.clone(),
            resolver: self.resolver.clone(),
            commits: self.commits.clone(),
            coordinator: self.coordinator.clone(),
            reviews: self.reviews.clone(),
            merges: self.merges.clone(),
            compactor: self.compactor.clone(),
            jobs: Arc::clone(&self.jobs),
        }
    }
}

impl<C: ContentComparable> std::fmt::Debug for VersionControl<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionControl")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: ContentComparable> VersionControl<C> {
    /// Builder with in-memory defaults
    #[must_use]
    pub fn builder() -> VersionControlBuilder<C> {
        VersionControlBuilder::default()
    }

    /// In-memory engine on `clock`
    ///
    /// # Errors
    /// [`VcError::Config`] for invalid configuration
    pub fn in_memory(config: EngineConfig, clock: Arc<dyn Clock>) -> VcResult<Self> {
        Self::builder().with_config(config).with_clock(clock).build()
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Branch registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &BranchRegistry {
        &self.registry
    }

    /// Create the configured root branch if it does not exist yet
    ///
    /// # Errors
    /// Store failures only
    pub fn bootstrap(&self) -> VcResult<BranchRecord> {
        let root = self.config.root()?;
        if let Some(existing) = self.registry.find(&root)? {
            return Ok(existing);
        }
        match self.registry.create(&root) {
            Ok(created) => {
                info!(root = %root, "Root branch bootstrapped");
                Ok(created)
            }
            // another instance won the race
            Err(VcError::BranchExists { .. }) => Ok(self.registry.get(&root)?.value),
            Err(e) => Err(e),
        }
    }

    // Branches

    /// Create a branch under an existing parent
    ///
    /// # Errors
    /// [`VcError::BranchExists`], [`VcError::BranchNotFound`] for a missing parent
    pub fn create_branch(&self, path: &BranchPath) -> VcResult<BranchRecord> {
        self.registry.create(path)
    }

    /// Branch by path
    ///
    /// # Errors
    /// Store failures only
    pub fn find_branch(&self, path: &BranchPath) -> VcResult<Option<BranchRecord>> {
        self.registry.find(path)
    }

    /// All branches in path order
    ///
    /// # Errors
    /// Store failures only
    pub fn list_branches(&self) -> VcResult<Vec<BranchRecord>> {
        self.registry.list()
    }

    /// Direct children of a branch
    ///
    /// # Errors
    /// Store failures only
    pub fn children(&self, path: &BranchPath) -> VcResult<Vec<BranchRecord>> {
        self.registry.children(path)
    }

    /// Position of a branch relative to its parent
    ///
    /// # Errors
    /// [`VcError::BranchNotFound`]
    pub fn sync_state(&self, path: &BranchPath) -> VcResult<SyncState> {
        self.registry.sync_state(path)
    }

    /// Timespan history of a branch
    ///
    /// # Errors
    /// [`VcError::BranchNotFound`]
    pub fn timespans(&self, path: &BranchPath) -> VcResult<Vec<BranchTimespan>> {
        self.registry.timespans(path)
    }

    /// Administrative unlock of a branch held by a crashed writer
    ///
    /// The writer's partial commit is discarded; see [`CommitManager::unlock`].
    ///
    /// # Errors
    /// [`VcError::BranchNotFound`]
    pub fn unlock(&self, path: &BranchPath) -> VcResult<Option<BranchLock>> {
        self.commits.unlock(path)
    }

    // Commits

    /// Open a commit; see [`CommitManager::open`]
    ///
    /// # Errors
    /// [`VcError::BranchLocked`] and pairing errors
    pub fn open_commit(
        &self,
        path: &BranchPath,
        commit_type: CommitType,
        source: Option<&BranchPath>,
    ) -> VcResult<Commit<C>> {
        self.commits.open(path, commit_type, source)
    }

    /// Complete a commit; see [`CommitManager::complete`]
    ///
    /// # Errors
    /// [`VcError::WriteFailed`], [`VcError::LockLost`]
    pub fn complete_commit(&self, commit: Commit<C>) -> VcResult<Timepoint> {
        self.commits.complete(commit)
    }

    /// Abandon a commit
    pub fn rollback_commit(&self, commit: Commit<C>) {
        self.commits.rollback(commit);
    }

    /// Undo the latest completed commit on `path`; see
    /// [`CommitManager::rollback_completed`]
    ///
    /// # Errors
    /// [`VcError::NotLatestCommit`], [`VcError::BranchLocked`]
    pub fn rollback_completed_commit(
        &self,
        path: &BranchPath,
        timepoint: Timepoint,
    ) -> VcResult<RolledBackCommit> {
        self.commits.rollback_completed(path, timepoint)
    }

    // Visibility

    /// Version id visible per entity on `path` at `at`
    ///
    /// # Errors
    /// [`VcError::VisibilityInvariantViolation`], [`VcError::BranchNotFoundAt`]
    pub fn resolve(&self, path: &BranchPath, at: Timepoint) -> VcResult<BTreeMap<BusinessId, VersionId>> {
        self.resolver.resolve(path, at)
    }

    /// Visible versions with content on `path` at `at`
    ///
    /// # Errors
    /// As [`Self::resolve`]
    pub fn resolve_records(&self, path: &BranchPath, at: Timepoint) -> VcResult<View<C>> {
        self.resolver.resolve_records(path, at)
    }

    /// Visible versions at the branch's head
    ///
    /// # Errors
    /// As [`Self::resolve`]
    pub fn resolve_head(&self, path: &BranchPath) -> VcResult<View<C>> {
        self.resolver.resolve_head(path)
    }

    // Rebase and promotion

    /// Pull the parent's head into `child`
    ///
    /// # Errors
    /// [`VcError::BranchLocked`], [`VcError::RootBranch`]
    pub fn rebase(&self, child: &BranchPath) -> VcResult<SyncOutcome> {
        self.coordinator.rebase(child)
    }

    /// Rebase with decided content for conflicting entities
    ///
    /// # Errors
    /// As [`Self::rebase`]
    pub fn rebase_with(
        &self,
        child: &BranchPath,
        resolutions: BTreeMap<BusinessId, Resolution<C>>,
    ) -> VcResult<SyncOutcome> {
        self.coordinator.rebase_with(child, resolutions)
    }

    /// Push `child`'s changes into its parent
    ///
    /// # Errors
    /// [`VcError::RebaseRequired`], [`VcError::BranchLocked`]
    pub fn promote(&self, child: &BranchPath) -> VcResult<SyncOutcome> {
        self.coordinator.promote(child)
    }

    // Reviews

    /// Review of `source` into `target`
    ///
    /// # Errors
    /// [`VcError::NotParentChild`], [`VcError::BranchNotFound`]
    pub fn create_review(&self, source: &BranchPath, target: &BranchPath) -> VcResult<BranchReview> {
        self.reviews.create_review(source, target)
    }

    /// Review that stops early when `token` is cancelled
    ///
    /// # Errors
    /// As [`Self::create_review`]
    pub fn create_review_cancellable(
        &self,
        source: &BranchPath,
        target: &BranchPath,
        token: &CancellationToken,
    ) -> VcResult<BranchReview> {
        self.reviews.create_review_cancellable(source, target, token)
    }

    /// Review computed on a background task
    ///
    /// # Errors
    /// As [`Self::create_review`], plus [`VcError::TaskFailed`]
    pub fn spawn_review(
        &self,
        source: &BranchPath,
        target: &BranchPath,
        token: CancellationToken,
    ) -> VcResult<PendingReview> {
        self.reviews.spawn_review(source, target, token)
    }

    /// Review by id, with a staleness check
    ///
    /// # Errors
    /// [`VcError::ReviewNotFound`]
    pub fn get_review(&self, id: ReviewId) -> VcResult<BranchReview> {
        self.reviews.get_review(id)
    }

    // Merge reviews

    /// Paired review of a parent and child
    ///
    /// # Errors
    /// [`VcError::NotParentChild`] unless `source` is `target`'s parent
    pub fn create_merge_review(&self, source: &BranchPath, target: &BranchPath) -> VcResult<MergeReview> {
        self.merges.create_merge_review(source, target)
    }

    /// Merge review by id, with a staleness check
    ///
    /// # Errors
    /// [`VcError::MergeReviewNotFound`]
    pub fn get_merge_review(&self, id: MergeReviewId) -> VcResult<MergeReview> {
        self.merges.get_merge_review(id)
    }

    /// Conflicts of a current merge review
    ///
    /// # Errors
    /// [`VcError::StaleReview`], [`VcError::ReviewNotCurrent`]
    pub fn merge_conflicts(&self, id: MergeReviewId) -> VcResult<Vec<MergeConflict<C>>> {
        self.merges.conflicts(id)
    }

    /// Record a manual resolution
    ///
    /// # Errors
    /// [`VcError::MergeReviewNotFound`], [`VcError::InvalidSnapshot`]
    pub fn submit_manual_merge(
        &self,
        id: MergeReviewId,
        business_id: BusinessId,
        snapshot: serde_json::Value,
        deleted: bool,
    ) -> VcResult<ManuallyMergedEntity> {
        self.merges.submit_manual_merge(id, business_id, snapshot, deleted)
    }

    /// Apply a merge review to its child branch
    ///
    /// # Errors
    /// [`VcError::UnresolvedConflicts`], [`VcError::StaleReview`]
    pub fn finalize_merge_review(&self, id: MergeReviewId) -> VcResult<Timepoint> {
        self.merges.finalize(id)
    }

    // Background merges

    /// Run a rebase (`source` is `target`'s parent) or promotion (`target`
    /// is `source`'s parent) on a blocking tokio task
    ///
    /// With `merge_review`, the rebase finalizes that merge review instead.
    ///
    /// # Errors
    /// - [`VcError::NotParentChild`] if the branches are not adjacent or the
    ///   merge review belongs to another pair
    /// - [`VcError::TaskFailed`] outside a tokio runtime
    pub fn merge_async(
        &self,
        source: &BranchPath,
        target: &BranchPath,
        merge_review: Option<MergeReviewId>,
    ) -> VcResult<MergeJob> {
        let mismatch = || VcError::NotParentChild {
            source_path: source.clone(),
            target_path: target.clone(),
        };
        let rebase = source.is_parent_of(target);
        if !rebase && !target.is_parent_of(source) {
            return Err(mismatch());
        }
        if let Some(id) = merge_review {
            let review = self.merges.get_merge_review(id)?;
            if !rebase || &review.source_path != source || &review.target_path != target {
                return Err(mismatch());
            }
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| VcError::TaskFailed(e.to_string()))?;

        let job = self
            .jobs
            .schedule(source.clone(), target.clone(), merge_review, self.registry.now());
        let engine = self.clone();
        let id = job.id;
        let (source, target) = (source.clone(), target.clone());
        runtime.spawn_blocking(move || {
            if let Err(e) = engine.jobs.start(id) {
                warn!(job = %id, error = %e, "Merge job vanished before it started");
                return;
            }
            let result = match (rebase, merge_review) {
                (true, Some(review)) => engine.merges.finalize(review).map(SyncOutcome::Committed),
                (true, None) => engine.coordinator.rebase(&target),
                (false, _) => engine.coordinator.promote(&source),
            };
            if let Err(e) = engine.jobs.finish(id, &result, engine.registry.now()) {
                warn!(job = %id, error = %e, "Merge job result could not be recorded");
            }
        });
        Ok(job)
    }

    /// Merge job by id
    ///
    /// # Errors
    /// [`VcError::MergeJobNotFound`]
    pub fn merge_job(&self, id: MergeJobId) -> VcResult<MergeJob> {
        self.jobs.get(id)
    }

    /// All merge jobs, oldest first
    #[must_use]
    pub fn merge_jobs(&self) -> Vec<MergeJob> {
        self.jobs.list()
    }

    /// Forget finished merge jobs that ended before `cutoff`
    pub fn prune_merge_jobs(&self, cutoff: Timepoint) -> usize {
        self.jobs.prune_finished(cutoff)
    }

    // Maintenance

    /// Drop tombstones that no longer affect visibility
    ///
    /// # Errors
    /// [`VcError::RootBranch`], [`VcError::BranchLocked`]
    pub fn compact_tombstones(&self, path: &BranchPath) -> VcResult<CompactionReport> {
        self.compactor.compact(path)
    }
}
