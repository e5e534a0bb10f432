//! BVC Merge Strategies
//!
//! Pluggable automatic resolution for entities changed on both sides of a
//! parent/child pair.
//!
//! # Strategies
//!
//! | Strategy | Merges when | Use Case |
//! |----------|-------------|----------|
//! | [`DisjointFieldStrategy`] | edits touch different fields | Default for field-structured records |
//! | [`SourceWinsStrategy`] | always, taking the parent | Mirror branches |
//! | [`ManualOnlyStrategy`] | never | Every conflict reviewed by a human |
//!
//! # Example
//!
//! ```rust
//! use bvc_merge::{MergeInput, StrategyRegistry};
//! use bvc_model::FieldMap;
//!
//! let registry = StrategyRegistry::<FieldMap>::with_defaults();
//! let strategy = registry.get("disjoint-fields").unwrap();
//!
//! let base = FieldMap::new().with("term", "a").with("active", true);
//! let parent = base.clone().with("active", false);
//! let child = base.clone().with("term", "b");
//! let merged = strategy
//!     .merge(MergeInput { base: Some(&base), source: &parent, target: &child })
//!     .merged()
//!     .unwrap();
//! assert_eq!(merged, FieldMap::new().with("term", "b").with("active", false));
//! ```

mod disjoint;
mod manual_only;
mod registry;
mod source_wins;
mod strategy;

pub use disjoint::DisjointFieldStrategy;
pub use manual_only::ManualOnlyStrategy;
pub use registry::StrategyRegistry;
pub use source_wins::SourceWinsStrategy;
pub use strategy::{
    ConflictKind, ConflictReport, MergeError, MergeInput, MergeOutcome, MergeStrategy,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
