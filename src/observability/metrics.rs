//! Scope lifecycle metrics.
//!
//! Provides counters and gauges shared by every scope a
//! [`ScopeManager`](crate::manager::ScopeManager) creates.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    pub fn name(&self) -> &str {
        self.name
    }
}

/// A gauge that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicI64::new(0),
        }
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the gauge name.
    pub fn name(&self) -> &str {
        self.name
    }
}

/// Live counters updated by scopes.
#[derive(Debug)]
pub struct ScopeMetrics {
    pub(crate) scopes_created: Counter,
    pub(crate) scopes_closed: Counter,
    pub(crate) open_scopes: Gauge,
    pub(crate) finalizers_registered: Counter,
    pub(crate) finalizers_run: Counter,
    pub(crate) finalizer_failures: Counter,
    pub(crate) late_registrations: Counter,
    pub(crate) rejected_registrations: Counter,
}

impl Default for ScopeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scopes_created: Counter::new("scopes_created"),
            scopes_closed: Counter::new("scopes_closed"),
            open_scopes: Gauge::new("open_scopes"),
            finalizers_registered: Counter::new("finalizers_registered"),
            finalizers_run: Counter::new("finalizers_run"),
            finalizer_failures: Counter::new("finalizer_failures"),
            late_registrations: Counter::new("late_registrations"),
            rejected_registrations: Counter::new("rejected_registrations"),
        }
    }

    pub(crate) fn record_created(&self) {
        self.scopes_created.increment();
        self.open_scopes.increment();
    }

    pub(crate) fn record_closed(&self) {
        self.scopes_closed.increment();
        self.open_scopes.decrement();
    }

    /// Takes a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ScopeStats {
        ScopeStats {
            scopes_created: self.scopes_created.get(),
            scopes_closed: self.scopes_closed.get(),
            open_scopes: self.open_scopes.get(),
            finalizers_registered: self.finalizers_registered.get(),
            finalizers_run: self.finalizers_run.get(),
            finalizer_failures: self.finalizer_failures.get(),
            late_registrations: self.late_registrations.get(),
            rejected_registrations: self.rejected_registrations.get(),
        }
    }
}

/// Snapshot of [`ScopeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeStats {
    /// Scopes created.
    pub scopes_created: u64,
    /// Scopes that reached `Closed`.
    pub scopes_closed: u64,
    /// Scopes created but not yet closed.
    pub open_scopes: i64,
    /// Finalizers accepted, including lenient late registrations.
    pub finalizers_registered: u64,
    /// Finalizer invocations.
    pub finalizers_run: u64,
    /// Finalizer invocations that failed or panicked.
    pub finalizer_failures: u64,
    /// Registrations accepted after close began (lenient policy).
    pub late_registrations: u64,
    /// Registrations rejected after close began (strict policy).
    pub rejected_registrations: u64,
}
