//! Core types for scopekeeper.
//!
//! - [`id`]: Identifier types (`ScopeId`, `FinalizerSeq`)
//! - [`cancel`]: Cancellation reason and kind types
//! - [`signal`]: Termination signal passed to finalizers

pub mod cancel;
pub mod id;
pub mod signal;

pub use cancel::{CancelKind, CancelReason};
pub use id::{FinalizerSeq, ScopeId};
pub use signal::{SuccessValue, TerminationSignal};
