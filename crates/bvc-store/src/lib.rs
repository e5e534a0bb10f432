//! BVC Store
//!
//! Persistence seams for the branch version-control engine, each with an
//! in-memory implementation.
//!
//! # Core Concepts
//!
//! - [`BranchStore`]: Branch records with revision-checked writes and
//!   timespan history
//! - [`RecordStore`]: Append-only record versions indexed by origin branch
//! - [`ReviewStore`]: Branch reviews, merge reviews and manual merges
//!
//! The engine only talks to these traits, so a document database can stand
//! in for the memory implementations as long as it offers conditional
//! writes on branch records.

mod branch;
mod error;
mod record;
mod review;

pub use branch::{BranchStore, MemoryBranchStore, Revision, Versioned};
pub use error::StoreError;
pub use record::{MemoryRecordStore, RecordStore, RollbackSummary};
pub use review::{MemoryReviewStore, ReviewStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
