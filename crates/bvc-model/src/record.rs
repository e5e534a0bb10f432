//! Versioned records
//!
//! A [`VersionedRecord`] is one immutable version of a logical entity. The
//! entity is named by its [`BusinessId`]; each version gets its own
//! [`VersionId`]. Versions are never rewritten except to set `end` once.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::path::BranchPath;
use crate::time::Timepoint;

/// Stable identifier of a logical entity across all its versions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessId(String);

impl BusinessId {
    /// Wrap an identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BusinessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BusinessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BusinessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier of a single version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Ulid);

impl VersionId {
    /// Fresh identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Underlying ULID
    #[inline]
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v-{}", self.0)
    }
}

/// One immutable version of an entity
///
/// # Invariants
/// - `start` is the timepoint of the commit that wrote it
/// - `end`, once set, is the timepoint of the commit that superseded it
/// - `origin` is the branch the version was written on and never changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<C> {
    /// Identity of this version
    pub version_id: VersionId,
    /// Entity this version belongs to
    pub business_id: BusinessId,
    /// Branch the version was written on
    pub origin: BranchPath,
    /// Commit timepoint that introduced the version
    pub start: Timepoint,
    /// Commit timepoint that superseded the version on its origin
    pub end: Option<Timepoint>,
    /// Child-branch version this one was promoted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_from: Option<VersionId>,
    /// Snapshot of the entity
    pub content: C,
}

impl<C> VersionedRecord<C> {
    /// New open-ended version with a fresh id
    #[must_use]
    pub fn new(
        business_id: BusinessId,
        origin: BranchPath,
        start: Timepoint,
        content: C,
    ) -> Self {
        Self {
            version_id: VersionId::new(),
            business_id,
            origin,
            start,
            end: None,
            promoted_from: None,
            content,
        }
    }

    /// Mark as a promoted copy of `source`
    #[inline]
    #[must_use]
    pub fn with_promoted_from(mut self, source: VersionId) -> Self {
        self.promoted_from = Some(source);
        self
    }

    /// Whether the version has not been superseded
    #[inline]
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// Whether the version is live at `cutoff` on its origin
    ///
    /// Live means started no later than `cutoff` and not ended at or
    /// before it.
    #[inline]
    #[must_use]
    pub fn is_live_at(&self, cutoff: Timepoint) -> bool {
        self.start <= cutoff && self.end.map_or(true, |end| end > cutoff)
    }
}
