//! Merge strategy trait and core types
//!
//! Provides the [`MergeStrategy`] trait used by merge reviews to propose an
//! automatic resolution for an entity edited on both parent and child.

use std::collections::BTreeSet;
use std::fmt::Debug;

use bvc_model::ContentComparable;
use serde::{Deserialize, Serialize};

/// The three snapshots of a conflicting entity
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a, C> {
    /// Content both sides started from (the parent's version at the child's base)
    pub base: Option<&'a C>,
    /// Parent's current content
    pub source: &'a C,
    /// Child's current content
    pub target: &'a C,
}

/// Automatic conflict resolution
///
/// # Contract
/// `merge` must be deterministic and must not consult anything beyond its
/// input, so the proposal shown to a reviewer is the content that will be
/// committed.
pub trait MergeStrategy<C: ContentComparable>: Send + Sync + Debug {
    /// Propose merged content, or explain why none can be produced
    fn merge(&self, input: MergeInput<'_, C>) -> MergeOutcome<C>;

    /// Registry name
    fn name(&self) -> &'static str;
}

/// Result of a merge attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<C> {
    /// Content that combines both edits
    Merged(C),
    /// Edits cannot be combined mechanically
    Conflict(ConflictReport),
}

impl<C> MergeOutcome<C> {
    /// Merged content, if any
    #[inline]
    #[must_use]
    pub fn merged(self) -> Option<C> {
        match self {
            Self::Merged(content) => Some(content),
            Self::Conflict(_) => None,
        }
    }

    /// Whether a merge was produced
    #[inline]
    #[must_use]
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

/// Why a strategy declined to merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Reason category
    pub kind: ConflictKind,
    /// Fields edited differently on both sides
    pub fields: BTreeSet<String>,
}

impl ConflictReport {
    /// Report without field detail
    #[inline]
    #[must_use]
    pub fn new(kind: ConflictKind) -> Self {
        Self {
            kind,
            fields: BTreeSet::new(),
        }
    }

    /// Attach the clashing fields
    #[inline]
    #[must_use]
    pub fn with_fields(mut self, fields: BTreeSet<String>) -> Self {
        self.fields = fields;
        self
    }
}

/// Conflict categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the same field to different values
    OverlappingFields,
    /// No common ancestor content to diff against
    MissingBase,
    /// Strategy never merges automatically
    ManualOnly,
}

/// Errors from strategy lookup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Name not in the registry
    #[error("unknown merge strategy '{name}' (available: {})", .available.join(", "))]
    UnknownStrategy {
        /// Requested name
        name: String,
        /// Registered names
        available: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_report_wire_format() {
        let report = ConflictReport::new(ConflictKind::OverlappingFields)
            .with_fields(BTreeSet::from(["term".to_string()]));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "overlapping_fields", "fields": ["term"] })
        );
        let back: ConflictReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn outcome_accessors() {
        let merged: MergeOutcome<u8> = MergeOutcome::Merged(7);
        assert!(merged.is_merged());
        assert_eq!(merged.merged(), Some(7));

        let conflict: MergeOutcome<u8> = MergeOutcome::Conflict(ConflictReport::new(ConflictKind::ManualOnly));
        assert!(!conflict.is_merged());
        assert_eq!(conflict.merged(), None);
    }
}
