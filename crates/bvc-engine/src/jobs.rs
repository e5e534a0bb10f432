//! Background merge jobs
//!
//! [`MergeJobTracker`] records the lifecycle of rebases and promotions run
//! through [`crate::VersionControl::merge_async`]:
//!
//! ```text
//! SCHEDULED ──► IN_PROGRESS ──► COMPLETED
//!                    │
//!                    ├────────► CONFLICTS (unresolved merge review)
//!                    └────────► FAILED
//! ```

use std::fmt::{self, Display};

use bvc_model::{BranchPath, MergeReviewId, Timepoint};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::coordinator::SyncOutcome;
use crate::error::{VcError, VcResult};

/// Merge job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeJobId(Ulid);

impl MergeJobId {
    /// Fresh, time-ordered id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MergeJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MergeJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "merge-job-{}", self.0)
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not started
    Scheduled,
    /// Running
    InProgress,
    /// Finished; the target moved or was already in sync
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped on unresolved merge conflicts
    Conflicts,
}

impl JobStatus {
    /// Whether the job has finished
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Conflicts)
    }
}

/// A rebase or promotion run in the background
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeJob {
    /// Identifier
    pub id: MergeJobId,
    /// Branch content comes from
    pub source: BranchPath,
    /// Branch that receives it
    pub target: BranchPath,
    /// Merge review applied by the job, for rebases
    pub merge_review: Option<MergeReviewId>,
    /// Lifecycle status
    pub status: JobStatus,
    /// Error detail for failed jobs
    pub message: Option<String>,
    /// Scheduling time
    pub started: Timepoint,
    /// Completion time
    pub ended: Option<Timepoint>,
    /// Timepoint of the commit the job made, if any
    pub commit: Option<Timepoint>,
}

/// In-memory job table
#[derive(Debug, Default)]
pub struct MergeJobTracker {
    jobs: DashMap<MergeJobId, MergeJob>,
}

impl MergeJobTracker {
    /// Empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job
    pub fn schedule(
        &self,
        source: BranchPath,
        target: BranchPath,
        merge_review: Option<MergeReviewId>,
        now: Timepoint,
    ) -> MergeJob {
        let job = MergeJob {
            id: MergeJobId::new(),
            source,
            target,
            merge_review,
            status: JobStatus::Scheduled,
            message: None,
            started: now,
            ended: None,
            commit: None,
        };
        self.jobs.insert(job.id, job.clone());
        debug!(job = %job.id, source = %job.source, target = %job.target, "Merge job scheduled");
        job
    }

    /// Mark a job as running
    ///
    /// # Errors
    /// [`VcError::MergeJobNotFound`] for an unknown id
    pub fn start(&self, id: MergeJobId) -> VcResult<()> {
        let mut job = self.jobs.get_mut(&id).ok_or(VcError::MergeJobNotFound(id))?;
        job.status = JobStatus::InProgress;
        Ok(())
    }

    /// Record the job's result
    ///
    /// # Errors
    /// [`VcError::MergeJobNotFound`] for an unknown id
    pub fn finish(
        &self,
        id: MergeJobId,
        result: &VcResult<SyncOutcome>,
        now: Timepoint,
    ) -> VcResult<MergeJob> {
        let mut job = self.jobs.get_mut(&id).ok_or(VcError::MergeJobNotFound(id))?;
        job.ended = Some(now);
        match result {
            Ok(outcome) => {
                job.status = JobStatus::Completed;
                job.commit = outcome.timepoint();
                info!(job = %id, target = %job.target, commit = ?job.commit, "Merge job completed");
            }
            Err(VcError::UnresolvedConflicts { ids }) => {
                job.status = JobStatus::Conflicts;
                job.message = Some(format!("{} unresolved conflicts", ids.len()));
                warn!(job = %id, target = %job.target, conflicts = ids.len(), "Merge job stopped on conflicts");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.message = Some(e.to_string());
                warn!(job = %id, target = %job.target, error = %e, "Merge job failed");
            }
        }
        Ok(job.clone())
    }

    /// Job by id
    ///
    /// # Errors
    /// [`VcError::MergeJobNotFound`] for an unknown id
    pub fn get(&self, id: MergeJobId) -> VcResult<MergeJob> {
        self.jobs
            .get(&id)
            .map(|job| job.clone())
            .ok_or(VcError::MergeJobNotFound(id))
    }

    /// All jobs, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<MergeJob> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Forget finished jobs that ended before `cutoff`; returns how many
    pub fn prune_finished(&self, cutoff: Timepoint) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.ended.is_some_and(|e| e < cutoff)));
        let pruned = before.saturating_sub(self.jobs.len());
        if pruned > 0 {
            debug!(pruned, %cutoff, "Finished merge jobs pruned");
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> BranchPath {
        s.parse().unwrap()
    }

    #[test]
    fn lifecycle_to_completed() {
        let tracker = MergeJobTracker::new();
        let job = tracker.schedule(path("MAIN"), path("MAIN/A"), None, Timepoint::from_millis(1));
        assert_eq!(job.status, JobStatus::Scheduled);

        tracker.start(job.id).unwrap();
        assert_eq!(tracker.get(job.id).unwrap().status, JobStatus::InProgress);

        let done = tracker
            .finish(
                job.id,
                &Ok(SyncOutcome::Committed(Timepoint::from_millis(5))),
                Timepoint::from_millis(6),
            )
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.status.is_terminal());
        assert_eq!(done.commit, Some(Timepoint::from_millis(5)));
    }

    #[test]
    fn conflicts_are_distinguished_from_failures() {
        let tracker = MergeJobTracker::new();
        let a = tracker.schedule(path("MAIN"), path("MAIN/A"), None, Timepoint::EPOCH);
        let b = tracker.schedule(path("MAIN/A"), path("MAIN"), None, Timepoint::EPOCH);

        let conflicts = tracker
            .finish(
                a.id,
                &Err(VcError::UnresolvedConflicts {
                    ids: vec!["X".into()],
                }),
                Timepoint::EPOCH,
            )
            .unwrap();
        assert_eq!(conflicts.status, JobStatus::Conflicts);

        let failed = tracker
            .finish(
                b.id,
                &Err(VcError::BranchLocked { path: path("MAIN") }),
                Timepoint::EPOCH,
            )
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.message.as_deref(), Some("branch MAIN is locked"));
        assert_eq!(tracker.list().len(), 2);
    }

    #[test]
    fn pruning_keeps_running_and_recent_jobs() {
        let tracker = MergeJobTracker::new();
        let old = tracker.schedule(path("MAIN"), path("MAIN/A"), None, Timepoint::from_millis(1));
        let recent = tracker.schedule(path("MAIN"), path("MAIN/B"), None, Timepoint::from_millis(1));
        let running = tracker.schedule(path("MAIN"), path("MAIN/C"), None, Timepoint::from_millis(1));
        let done = Ok(SyncOutcome::NoChanges);
        tracker.finish(old.id, &done, Timepoint::from_millis(10)).unwrap();
        tracker.finish(recent.id, &done, Timepoint::from_millis(50)).unwrap();
        tracker.start(running.id).unwrap();

        assert_eq!(tracker.prune_finished(Timepoint::from_millis(20)), 1);
        assert!(tracker.get(old.id).is_err());
        assert!(tracker.get(recent.id).is_ok());
        assert!(tracker.get(running.id).is_ok());
        assert_eq!(tracker.prune_finished(Timepoint::from_millis(20)), 0);
    }

    #[test]
    fn unknown_job_is_reported() {
        let tracker = MergeJobTracker::new();
        let id = MergeJobId::new();
        assert!(matches!(tracker.get(id), Err(VcError::MergeJobNotFound(missing)) if missing == id));
    }
}
