//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{VcError, VcResult};

/// Cloneable flag checked by long-running scans
///
/// All clones share one flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Token that has not been cancelled
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`VcError::Cancelled`] if cancellation was requested
    ///
    /// # Errors
    /// [`VcError::Cancelled`]
    #[inline]
    pub fn check(&self) -> VcResult<()> {
        if self.is_cancelled() {
            Err(VcError::Cancelled)
        } else {
            Ok(())
        }
    }
}
