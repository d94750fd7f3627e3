//! The operation context.
//!
//! A [`Cx`] is handed to every scoped operation. It names the scope the
//! operation registers finalizers into and carries the operation's
//! cancellation token. There is no ambient scope: an operation that needs
//! one receives it here, explicitly.

use super::token::CancelToken;
use crate::error::{Error, Result};
use crate::scope::ScopeHandle;
use crate::types::{CancelKind, CancelReason, TerminationSignal};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capability context for a scoped operation.
#[derive(Debug, Clone)]
pub struct Cx {
    scope: ScopeHandle,
    cancel: CancelToken,
}

impl Cx {
    /// Creates a context targeting `scope`.
    #[must_use]
    pub fn new(scope: ScopeHandle, cancel: CancelToken) -> Self {
        Self { scope, cancel }
    }

    /// Creates a context targeting `scope` with a fresh cancellation token.
    #[must_use]
    pub fn for_scope(scope: ScopeHandle) -> Self {
        Self::new(scope, CancelToken::new())
    }

    /// Returns the scope finalizers are registered into.
    #[must_use]
    pub fn scope(&self) -> &ScopeHandle {
        &self.scope
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Returns a context that registers into `scope` but shares this
    /// context's cancellation token.
    #[must_use]
    pub fn with_scope(&self, scope: ScopeHandle) -> Self {
        Self {
            scope,
            cancel: self.cancel.clone(),
        }
    }

    /// Registers a finalizer into this context's scope.
    pub fn add_finalizer<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&TerminationSignal) -> Result<()> + Send + 'static,
    {
        self.scope.add_finalizer(f)
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancel_requested()
    }

    /// Returns `Err(Cancelled)` if cancellation is pending and not masked.
    pub fn checkpoint(&self) -> Result<()> {
        self.cancel.checkpoint()
    }

    /// Executes a closure with cancellation masked.
    pub fn masked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.cancel.masked(f)
    }

    /// Acquires a resource and registers its release in one uninterruptible
    /// step.
    ///
    /// A pending cancellation is observed once, before `acquire` starts. From
    /// then on `acquire` and the registration of `release` run masked, so a
    /// resource is either not acquired at all or acquired with its release
    /// registered. If `acquire` fails nothing is registered and the error is
    /// returned unchanged.
    ///
    /// If the scope stopped accepting finalizers in the meantime, `release`
    /// runs immediately and the registration error is returned.
    pub fn acquire_release<R, A, F>(&self, acquire: A, release: F) -> Result<Arc<R>>
    where
        R: Send + Sync + 'static,
        A: FnOnce() -> Result<R>,
        F: FnOnce(&R, &TerminationSignal) -> Result<()> + Send + 'static,
    {
        self.checkpoint()?;
        self.masked(|| {
            let resource = Arc::new(acquire()?);
            let slot = Arc::new(Mutex::new(Some(release)));

            let held = Arc::clone(&resource);
            let registered_slot = Arc::clone(&slot);
            let registered = self.scope.add_finalizer(move |signal| {
                match registered_slot.lock().take() {
                    Some(release) => release(&held, signal),
                    None => Ok(()),
                }
            });

            match registered {
                Ok(()) => {
                    debug!(scope_id = %self.scope.id(), "resource acquired");
                    Ok(resource)
                }
                Err(err) => {
                    let signal = self.scope.close_signal().unwrap_or_else(|| {
                        TerminationSignal::cancelled(CancelReason::new(CancelKind::ParentClosed))
                    });
                    if let Some(release) = slot.lock().take() {
                        if let Err(release_err) = release(&resource, &signal) {
                            warn!(
                                scope_id = %self.scope.id(),
                                error = %release_err,
                                "release after rejected registration failed"
                            );
                        }
                    }
                    Err(err)
                }
            }
        })
    }

    /// The termination signal for `result`, using this context's recorded
    /// cancellation reason when the operation reports cancellation.
    #[must_use]
    pub fn signal_for<T>(&self, result: &std::result::Result<T, Error>) -> TerminationSignal
    where
        T: Clone + Send + Sync + 'static,
    {
        match result {
            Err(err) if err.is_cancelled() => {
                TerminationSignal::cancelled(self.cancel.reason().unwrap_or_default())
            }
            other => TerminationSignal::from_result(other),
        }
    }
}
