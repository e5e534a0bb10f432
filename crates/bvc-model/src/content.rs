//! Versioned content
//!
//! The engine is agnostic to what a record contains. It only needs to know
//! whether two snapshots differ, which named fields differ, and how to carry
//! a set of fields from one snapshot onto another. Those capabilities form
//! [`ContentComparable`].
//!
//! [`FieldMap`] is a ready-made implementation for records that are flat
//! maps of JSON values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Content that can be versioned on a branch
///
/// # Contract
/// - `content_hash` must be deterministic and ignore identity/version metadata
/// - `changed_fields(a, a)` is empty
/// - `a.with_fields_from(b, &b.changed_fields(a))` is content-equal to `b`
///
/// # Example
/// ```rust,ignore
/// impl ContentComparable for Concept {
///     fn content_hash(&self) -> ContentHash { ContentHash::of_json(&self.body).unwrap_or_default() }
///     fn changed_fields(&self, base: &Self) -> BTreeSet<String> { ... }
///     fn with_fields_from(&self, from: &Self, fields: &BTreeSet<String>) -> Self { ... }
/// }
/// ```
pub trait ContentComparable:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Fingerprint of the content, independent of identity and version
    fn content_hash(&self) -> ContentHash;

    /// Whether `other` carries different content
    ///
    /// Default implementation compares fingerprints.
    fn is_content_changed(&self, other: &Self) -> bool {
        self.content_hash() != other.content_hash()
    }

    /// Names of fields whose values differ between `self` and `base`
    fn changed_fields(&self, base: &Self) -> BTreeSet<String>;

    /// Copy of `self` with the named fields taken from `from`
    #[must_use]
    fn with_fields_from(&self, from: &Self, fields: &BTreeSet<String>) -> Self;
}

/// Record content as a sorted map of named JSON values
///
/// A missing field and an explicit `null` are distinct values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, serde_json::Value>);

impl FieldMap {
    /// Empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Set a field, returning the previous value
    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<serde_json::Value> {
        self.0.remove(field)
    }

    /// Field value
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    /// Field value as a string slice, when it is a JSON string
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(serde_json::Value::as_str)
    }

    /// Number of fields
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no fields
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for FieldMap
where
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl ContentComparable for FieldMap {
    fn content_hash(&self) -> ContentHash {
        // A BTreeMap of JSON values always encodes
        ContentHash::of_json(&self.0).unwrap_or_else(|_| ContentHash::digest(&[]))
    }

    fn is_content_changed(&self, other: &Self) -> bool {
        self.0 != other.0
    }

    fn changed_fields(&self, base: &Self) -> BTreeSet<String> {
        self.0
            .keys()
            .chain(base.0.keys())
            .filter(|k| self.0.get(*k) != base.0.get(*k))
            .cloned()
            .collect()
    }

    fn with_fields_from(&self, from: &Self, fields: &BTreeSet<String>) -> Self {
        let mut merged = self.clone();
        for field in fields {
            match from.0.get(field) {
                Some(value) => {
                    merged.0.insert(field.clone(), value.clone());
                }
                None => {
                    merged.0.remove(field);
                }
            }
        }
        merged
    }
}
