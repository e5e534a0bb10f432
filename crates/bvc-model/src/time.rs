//! Timepoints and clocks
//!
//! Every commit is stamped with a [`Timepoint`] in milliseconds since the
//! Unix epoch. The engine never reads the wall clock directly; it goes
//! through a [`Clock`] so tests can drive time by hand.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Instant on the version-control timeline (milliseconds since epoch)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timepoint(u64);

impl Timepoint {
    /// Earliest representable timepoint
    pub const EPOCH: Self = Self(0);

    /// Timepoint from milliseconds
    #[inline]
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since epoch
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// The immediately following timepoint
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Render as RFC 3339 for logs and diagnostics
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        i64::try_from(self.0)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map_or_else(|| self.0.to_string(), |dt| dt.to_rfc3339())
    }
}

impl Display for Timepoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timepoint {
    fn from(ms: u64) -> Self {
        Self(ms)
    }
}

/// Source of "now"
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current timepoint
    fn now(&self) -> Timepoint;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timepoint {
        let ms = chrono::Utc::now().timestamp_millis();
        Timepoint(u64::try_from(ms).unwrap_or_default())
    }
}

/// Hand-driven clock for deterministic tests and replay
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    /// Clock stopped at `start`
    #[must_use]
    pub fn new(start: impl Into<Timepoint>) -> Self {
        Self {
            ms: AtomicU64::new(start.into().as_millis()),
        }
    }

    /// Jump to an absolute timepoint
    pub fn set(&self, to: impl Into<Timepoint>) {
        self.ms.store(to.into().as_millis(), Ordering::SeqCst);
    }

    /// Move forward and return the new reading
    pub fn advance(&self, by_ms: u64) -> Timepoint {
        Timepoint(self.ms.fetch_add(by_ms, Ordering::SeqCst) + by_ms)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timepoint {
        Timepoint(self.ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_millis() {
        assert!(Timepoint::from_millis(100) < Timepoint::from_millis(110));
        assert_eq!(Timepoint::from_millis(100).next(), Timepoint::from_millis(101));
        assert_eq!(Timepoint::from_millis(u64::MAX).next().as_millis(), u64::MAX);
    }

    #[test]
    fn manual_clock_set_and_advance() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), Timepoint::from_millis(100));
        assert_eq!(clock.advance(10), Timepoint::from_millis(110));
        clock.set(50);
        assert_eq!(clock.now(), Timepoint::from_millis(50));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > Timepoint::from_millis(1_577_836_800_000));
    }

    #[test]
    fn rfc3339_rendering() {
        assert_eq!(
            Timepoint::EPOCH.to_rfc3339(),
            "1970-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_string(&Timepoint::from_millis(42)).unwrap();
        assert_eq!(json, "42");
    }
}
