//! Identifier types for scopes and finalizer entries.
//!
//! Both identifiers are drawn from process-wide atomic counters, so they are
//! unique across every [`ScopeManager`](crate::manager::ScopeManager) in the
//! process. Finalizer sequence numbers in particular must be globally ordered:
//! merged scopes interleave entries from several scopes by acquisition time.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_FINALIZER_SEQ: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a scope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Allocates the next scope identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a scope ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Monotonic registration stamp of a finalizer entry.
///
/// Larger values were registered later and therefore run earlier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FinalizerSeq(u64);

impl FinalizerSeq {
    /// Allocates the next sequence number.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(NEXT_FINALIZER_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a sequence number for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FinalizerSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FinalizerSeq({})", self.0)
    }
}

impl fmt::Display for FinalizerSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
