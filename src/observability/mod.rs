//! Observability for scope lifecycles.
//!
//! Structured events are emitted through `tracing` at the call sites; this
//! module holds the counters that summarize them.

pub mod metrics;

pub use metrics::{Counter, Gauge, ScopeMetrics, ScopeStats};
