//! Internal records for scopes and their finalizers.
//!
//! These are the plain state-machine types wrapped by
//! [`ScopeHandle`](crate::scope::ScopeHandle); they carry no locking of their own.

pub mod finalizer;
pub mod scope;

pub use finalizer::{Finalizer, FinalizerFn, FinalizerRun, FinalizerStack};
pub use scope::{ScopeRecord, ScopeState};
