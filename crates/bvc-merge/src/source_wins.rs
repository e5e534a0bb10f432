//! Source-wins merge
//!
//! Resolves every conflict in favour of the parent's content, discarding
//! the child's edit. Suited to branches that only track an upstream.

use bvc_model::ContentComparable;

use crate::strategy::{MergeInput, MergeOutcome, MergeStrategy};

/// Always takes the source (parent) content
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceWinsStrategy;

impl SourceWinsStrategy {
    /// Registry name
    pub const NAME: &'static str = "source-wins";
}

impl<C: ContentComparable> MergeStrategy<C> for SourceWinsStrategy {
    fn merge(&self, input: MergeInput<'_, C>) -> MergeOutcome<C> {
        MergeOutcome::Merged(input.source.clone())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bvc_model::FieldMap;

    #[test]
    fn takes_source_even_without_base() {
        let parent = FieldMap::new().with("term", "parent");
        let child = FieldMap::new().with("term", "child");
        let outcome = SourceWinsStrategy.merge(MergeInput {
            base: None,
            source: &parent,
            target: &child,
        });
        assert_eq!(outcome.merged(), Some(parent));
    }
}
