//! Disjoint-field merge
//!
//! Combines the two edits when they touched different fields of the base,
//! or touched the same field in the same way.

use std::collections::BTreeSet;

use bvc_model::ContentComparable;

use crate::strategy::{ConflictKind, ConflictReport, MergeInput, MergeOutcome, MergeStrategy};

/// Merges edits that change disjoint fields
///
/// # Algorithm
/// 1. Diff each side against the base
/// 2. Fields changed on both sides to different values are a conflict
/// 3. Otherwise start from the source and lay the target's changed fields
///    over it
#[derive(Debug, Clone, Copy, Default)]
pub struct DisjointFieldStrategy;

impl DisjointFieldStrategy {
    /// Registry name
    pub const NAME: &'static str = "disjoint-fields";

    /// Create strategy
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<C: ContentComparable> MergeStrategy<C> for DisjointFieldStrategy {
    fn merge(&self, input: MergeInput<'_, C>) -> MergeOutcome<C> {
        let Some(base) = input.base else {
            return MergeOutcome::Conflict(ConflictReport::new(ConflictKind::MissingBase));
        };

        let source_changes = input.source.changed_fields(base);
        let target_changes = input.target.changed_fields(base);
        let disagreements = input.source.changed_fields(input.target);

        let clashing: BTreeSet<String> = source_changes
            .intersection(&target_changes)
            .filter(|field| disagreements.contains(*field))
            .cloned()
            .collect();

        if clashing.is_empty() {
            MergeOutcome::Merged(input.source.with_fields_from(input.target, &target_changes))
        } else {
            MergeOutcome::Conflict(
                ConflictReport::new(ConflictKind::OverlappingFields).with_fields(clashing),
            )
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
