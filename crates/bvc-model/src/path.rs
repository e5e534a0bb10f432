//! Branch paths
//!
//! A [`BranchPath`] is a `/`-separated hierarchical name such as
//! `MAIN/PROJECT-A/TASK-1`. The parent of a branch is its path minus the
//! last segment; a single-segment path names a root branch.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Segment separator
pub const SEPARATOR: char = '/';

/// Hierarchical branch name
///
/// # Examples
/// - `MAIN` is a root branch
/// - `MAIN/PROJECT-A` is a child of `MAIN`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchPath(String);

impl BranchPath {
    /// Parse and validate a path
    ///
    /// # Errors
    /// Returns error if the path is empty, has an empty segment, or a
    /// segment contains characters other than ASCII alphanumerics, `-` and `.`
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        for segment in path.split(SEPARATOR) {
            validate_segment(segment)?;
        }
        Ok(Self(path))
    }

    /// Path as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments from root to leaf
    #[inline]
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Number of segments; roots have depth 1
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count() + 1
    }

    /// Whether this path has no parent
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        !self.0.contains(SEPARATOR)
    }

    /// Parent path, if any
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Append a segment
    ///
    /// # Errors
    /// Returns error if the segment is not a valid single segment
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        Ok(Self(format!("{}{SEPARATOR}{segment}", self.0)))
    }

    /// Whether `other` is a direct child of this path
    #[must_use]
    pub fn is_parent_of(&self, other: &Self) -> bool {
        other.parent().as_ref() == Some(self)
    }

    /// Whether this path is a strict ancestor of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == SEPARATOR as u8
    }

    /// Strict ancestors, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = Self> {
        std::iter::successors(self.parent(), Self::parent)
    }
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment.contains('_') {
        return Err(PathError::Underscore(segment.to_string()));
    }
    if segment
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '.'))
    {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

impl Display for BranchPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BranchPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BranchPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchPath> for String {
    fn from(path: BranchPath) -> Self {
        path.0
    }
}

impl AsRef<str> for BranchPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors related to branch paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty path
    #[error("branch path is empty")]
    Empty,

    /// Empty segment in path (leading, trailing or doubled separator)
    #[error("branch path contains an empty segment")]
    EmptySegment,

    /// Underscores are reserved
    #[error("branch path segment '{0}' contains '_', which is reserved")]
    Underscore(String),

    /// Invalid segment characters
    #[error("invalid branch path segment: {0} (allowed: ASCII alphanumerics, '-', '.')")]
    InvalidSegment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> BranchPath {
        s.parse().unwrap()
    }

    #[test]
    fn root_has_no_parent() {
        let main = path("MAIN");
        assert!(main.is_root());
        assert_eq!(main.depth(), 1);
        assert!(main.parent().is_none());
    }

    #[test]
    fn parent_drops_last_segment() {
        let task = path("MAIN/PROJECT-A/TASK-1");
        assert_eq!(task.parent(), Some(path("MAIN/PROJECT-A")));
        assert_eq!(task.name(), "TASK-1");
        assert_eq!(task.depth(), 3);
    }

    #[test]
    fn ancestors_nearest_first() {
        let task = path("MAIN/A/B");
        let chain: Vec<_> = task.ancestors().map(|p| p.to_string()).collect();
        assert_eq!(chain, vec!["MAIN/A", "MAIN"]);
    }

    #[test]
    fn parent_and_ancestor_relations() {
        let main = path("MAIN");
        let a = path("MAIN/A");
        let b = path("MAIN/A/B");
        let sibling = path("MAIN/AB");

        assert!(main.is_parent_of(&a));
        assert!(!main.is_parent_of(&b));
        assert!(main.is_ancestor_of(&b));
        assert!(!a.is_ancestor_of(&sibling));
        assert!(!a.is_ancestor_of(&a));
    }

    #[test]
    fn child_appends_segment() {
        let main = path("MAIN");
        assert_eq!(main.child("2024-01-31").unwrap(), path("MAIN/2024-01-31"));
        assert!(main.child("a/b").is_err());
    }

    #[test]
    fn rejects_invalid_paths() {
        assert_eq!(BranchPath::new(""), Err(PathError::Empty));
        assert_eq!(BranchPath::new("MAIN//A"), Err(PathError::EmptySegment));
        assert_eq!(BranchPath::new("MAIN/"), Err(PathError::EmptySegment));
        assert!(matches!(
            BranchPath::new("MAIN/MY_TASK"),
            Err(PathError::Underscore(_))
        ));
        assert!(matches!(
            BranchPath::new("MAIN/a b"),
            Err(PathError::InvalidSegment(_))
        ));
    }

    #[test]
    fn serde_uses_plain_string() {
        let p = path("MAIN/A");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"MAIN/A\"");
        let back: BranchPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<BranchPath>("\"MAIN/_x\"").is_err());
    }

    #[test]
    fn lexical_order_puts_parent_first() {
        assert!(path("MAIN") < path("MAIN/A"));
        assert!(path("MAIN/A") < path("MAIN/A/B"));
    }
}
