//! BVC Engine
//!
//! Branch-scoped temporal version control. Every entity version belongs to
//! the branch that wrote it; a branch sees its own versions plus its
//! ancestors' versions as of its base, minus the ones it has tombstoned.
//!
//! # Core Concepts
//!
//! - [`BranchRegistry`]: Branch records, optimistic locks and timespans
//! - [`CommitManager`]: Locked, buffered commits that become visible when
//!   head moves
//! - [`VisibilityResolver`]: Point-in-time view of a branch
//! - [`Coordinator`]: Rebase (child pulls) and promotion (child pushes)
//! - [`ReviewEngine`] / [`MergeReviewEngine`]: Diffs and conflict
//!   resolution between a parent and child
//! - [`VersionControl`]: Facade over all of the above
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bvc_engine::{EngineConfig, VersionControl};
//! use bvc_model::{CommitType, FieldMap, ManualClock};
//!
//! let clock = Arc::new(ManualClock::new(100));
//! let vc = VersionControl::<FieldMap>::in_memory(EngineConfig::default(), clock.clone()).unwrap();
//! let main = vc.bootstrap().unwrap().path;
//! let child = main.child("PROJECT-A").unwrap();
//! vc.create_branch(&child).unwrap();
//!
//! clock.set(110);
//! let mut commit = vc.open_commit(&child, CommitType::Content, None).unwrap();
//! commit.write("22298006".into(), FieldMap::new().with("term", "Heart attack")).unwrap();
//! commit.complete().unwrap();
//!
//! assert_eq!(vc.resolve_head(&child).unwrap().len(), 1);
//! assert!(vc.resolve_head(&main).unwrap().is_empty());
//!
//! vc.promote(&child).unwrap();
//! assert_eq!(vc.resolve_head(&main).unwrap().len(), 1);
//! ```

pub mod cancel;
pub mod commit;
pub mod compaction;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod jobs;
pub mod merge_review;
pub mod registry;
pub mod review;
pub mod telemetry;
pub mod vc;
pub mod visibility;

pub use cancel::CancellationToken;
pub use commit::{Commit, CommitManager, RolledBackCommit, WriteOutcome};
pub use compaction::{CompactionReport, TombstoneCompactor};
pub use config::{EngineConfig, TelemetryConfig};
pub use coordinator::{Coordinator, Resolution, SyncOutcome};
pub use error::{VcError, VcResult};
pub use jobs::{JobStatus, MergeJob, MergeJobId, MergeJobTracker};
pub use merge_review::{MergeConflict, MergeReviewEngine};
pub use registry::BranchRegistry;
pub use review::{PendingReview, ReviewEngine};
pub use telemetry::init_tracing;
pub use vc::{VersionControl, VersionControlBuilder};
pub use visibility::{View, ViewChange, VisibilityResolver};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
