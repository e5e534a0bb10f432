//! Strategy registry
//!
//! Provides [`StrategyRegistry`] for looking up merge strategies by the
//! name used in engine configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use bvc_model::ContentComparable;

use crate::disjoint::DisjointFieldStrategy;
use crate::manual_only::ManualOnlyStrategy;
use crate::source_wins::SourceWinsStrategy;
use crate::strategy::{MergeError, MergeStrategy};

/// Named merge strategies for one content type
#[derive(Debug)]
pub struct StrategyRegistry<C: ContentComparable> {
    strategies: BTreeMap<String, Arc<dyn MergeStrategy<C>>>,
}

impl<C: ContentComparable> Clone for StrategyRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
        }
    }
}

impl<C: ContentComparable> Default for StrategyRegistry<C> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: ContentComparable> StrategyRegistry<C> {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Registry with the built-in strategies
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DisjointFieldStrategy));
        registry.register(Arc::new(SourceWinsStrategy));
        registry.register(Arc::new(ManualOnlyStrategy));
        registry
    }

    /// Add or replace a strategy under its own name
    pub fn register(&mut self, strategy: Arc<dyn MergeStrategy<C>>) {
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    /// Check if strategy exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Look up a strategy
    ///
    /// # Errors
    /// [`MergeError::UnknownStrategy`] if the name is not registered
    pub fn get(&self, name: &str) -> Result<Arc<dyn MergeStrategy<C>>, MergeError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| MergeError::UnknownStrategy {
                name: name.to_string(),
                available: self.names().into_iter().map(String::from).collect(),
            })
    }

    /// Registered names in sorted order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Get number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
