//! Cancellation token with masking.

use crate::error::{Error, Result};
use crate::types::CancelReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
struct TokenInner {
    requested: AtomicBool,
    mask_depth: AtomicU32,
    reason: Mutex<Option<CancelReason>>,
}

/// A shared cancellation request flag.
///
/// Requesting cancellation never closes a scope; it only makes
/// [`checkpoint`](Self::checkpoint) report cancellation to the operation
/// that polls it. While the token is masked the request is deferred.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

/// Guard that restores the cancellation mask on drop.
struct MaskGuard<'a> {
    inner: &'a TokenInner,
}

impl Drop for MaskGuard<'_> {
    fn drop(&mut self) {
        self.inner.mask_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CancelToken {
    /// Creates a token with no pending request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    ///
    /// Repeated requests strengthen the recorded reason.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut current = self.inner.reason.lock();
            match current.as_mut() {
                Some(existing) => {
                    existing.strengthen(&reason);
                }
                None => *current = Some(reason),
            }
        }
        self.inner.requested.store(true, Ordering::Release);
    }

    /// Returns true if cancellation has been requested (masked or not).
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Returns the recorded cancellation reason.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().clone()
    }

    /// Returns the current mask depth.
    #[must_use]
    pub fn mask_depth(&self) -> u32 {
        self.inner.mask_depth.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` if cancellation is pending and not masked.
    pub fn checkpoint(&self) -> Result<()> {
        if !self.is_cancel_requested() {
            return Ok(());
        }
        if self.mask_depth() > 0 {
            trace!(mask_depth = self.mask_depth(), "cancel observed but masked");
            return Ok(());
        }
        let reason = self.reason().unwrap_or_default();
        Err(Error::cancelled(&reason))
    }

    /// Executes a closure with cancellation masked.
    ///
    /// Masking nests; cancellation becomes observable again when the depth
    /// returns to zero.
    pub fn masked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.mask_depth.fetch_add(1, Ordering::AcqRel);
        let _guard = MaskGuard { inner: &self.inner };
        f()
    }
}
