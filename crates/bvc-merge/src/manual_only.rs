//! Manual-only merge
//!
//! Never proposes a resolution, so every conflict must be settled by a
//! manual merge before a merge review can be finalized.

use bvc_model::ContentComparable;

use crate::strategy::{ConflictKind, ConflictReport, MergeInput, MergeOutcome, MergeStrategy};

/// Declines every merge
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualOnlyStrategy;

impl ManualOnlyStrategy {
    /// Registry name
    pub const NAME: &'static str = "manual-only";
}

impl<C: ContentComparable> MergeStrategy<C> for ManualOnlyStrategy {
    fn merge(&self, input: MergeInput<'_, C>) -> MergeOutcome<C> {
        let fields = input.source.changed_fields(input.target);
        MergeOutcome::Conflict(ConflictReport::new(ConflictKind::ManualOnly).with_fields(fields))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
