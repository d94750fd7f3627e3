//! Scopekeeper: scope-based resource lifecycles with deterministic finalization.
//!
//! # Overview
//!
//! A scope owns finalizers and child scopes. Closing it runs every finalizer
//! exactly once, most recently registered first, handing each the signal the
//! scope terminated with. Failures never stop the pass; they are collected
//! into one [`CompositeFailure`].
//!
//! # Core Guarantees
//!
//! - **Reverse order**: finalizers run in strict reverse registration order,
//!   including across merged scopes
//! - **Exactly once**: closing twice is a no-op returning the first result
//! - **No short-circuit**: a failing or panicking finalizer does not prevent
//!   the rest from running
//! - **Explicit context**: operations receive their scope through [`Cx`];
//!   there is no ambient scope
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers, cancellation reasons, termination signals
//! - [`record`]: Scope and finalizer state machines
//! - [`scope`]: Shared scope handle (close, merge, fork)
//! - [`cx`]: Operation context and cancellation token
//! - [`manager`]: Scope manager and scoped execution
//! - [`config`]: Configuration and environment overrides
//! - [`observability`]: Lifecycle counters
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use scopekeeper::{ScopeManager, TerminationSignal};
//!
//! let manager = ScopeManager::default();
//! let scope = manager.create_scope();
//! manager.add_finalizer(&scope, |_| Ok(())).unwrap();
//! manager.close_scope(&scope, TerminationSignal::unit()).unwrap();
//! assert!(scope.is_closed());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod cx;
pub mod error;
pub mod manager;
pub mod observability;
pub mod record;
pub mod scope;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use config::{ConfigError, LateRegistration, ScopeConfig};
pub use cx::{CancelToken, Cx};
pub use error::{CompositeFailure, Error, ErrorCategory, ErrorKind, Result};
pub use manager::ScopeManager;
pub use observability::ScopeStats;
pub use record::ScopeState;
pub use scope::{ScopeHandle, WeakScopeHandle};
pub use types::{CancelKind, CancelReason, ScopeId, SuccessValue, TerminationSignal};
