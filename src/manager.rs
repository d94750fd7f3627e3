//! The scope manager.
//!
//! [`ScopeManager`] is the entry point: it creates scopes sharing one
//! configuration and one set of counters, and runs operations inside
//! ephemeral scopes whose close signal is derived from the operation's
//! outcome.

use crate::config::{ConfigError, ScopeConfig};
use crate::cx::{CancelToken, Cx};
use crate::error::{CompositeFailure, Error, Result};
use crate::observability::{ScopeMetrics, ScopeStats};
use crate::record::finalizer::payload_to_string;
use crate::scope::ScopeHandle;
use crate::types::{CancelReason, TerminationSignal};
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// Creates, combines and closes scopes.
#[derive(Debug, Clone)]
pub struct ScopeManager {
    config: ScopeConfig,
    metrics: Arc<ScopeMetrics>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new(ScopeConfig::default())
    }
}

impl ScopeManager {
    /// Creates a manager whose scopes use `config`.
    #[must_use]
    pub fn new(config: ScopeConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(ScopeMetrics::new()),
        }
    }

    /// Creates a manager configured from `SCOPEKEEPER_*` environment variables.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(ScopeConfig::from_env()?))
    }

    /// Returns the configuration applied to new scopes.
    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Returns a snapshot of the lifecycle counters.
    #[must_use]
    pub fn stats(&self) -> ScopeStats {
        self.metrics.snapshot()
    }

    /// Creates a new open scope with no finalizers.
    #[must_use]
    pub fn create_scope(&self) -> ScopeHandle {
        ScopeHandle::new(self.config.clone(), Arc::clone(&self.metrics), Vec::new())
    }

    /// Registers `f` to run when `scope` closes.
    pub fn add_finalizer<F>(&self, scope: &ScopeHandle, f: F) -> Result<()>
    where
        F: FnOnce(&TerminationSignal) -> Result<()> + Send + 'static,
    {
        scope.add_finalizer(f)
    }

    /// Closes `scope` with `signal`. See [`ScopeHandle::close`].
    pub fn close_scope(
        &self,
        scope: &ScopeHandle,
        signal: TerminationSignal,
    ) -> std::result::Result<(), CompositeFailure> {
        scope.close(signal)
    }

    /// Wraps `op` so that every finalizer it registers lands in `target`.
    ///
    /// The returned operation keeps the caller's cancellation token. No scope
    /// is created or closed; `target` stays open until someone closes it.
    pub fn extend_scope<T, F>(&self, op: F, target: &ScopeHandle) -> impl FnOnce(&Cx) -> Result<T>
    where
        F: FnOnce(&Cx) -> Result<T>,
    {
        let target = target.clone();
        move |cx: &Cx| {
            trace!(from = %cx.scope().id(), into = %target.id(), "extending operation");
            op(&cx.with_scope(target))
        }
    }

    /// Produces a scope whose close closes both `a` and `b`.
    #[must_use]
    pub fn merge_scopes(&self, a: &ScopeHandle, b: &ScopeHandle) -> ScopeHandle {
        self.merge_all([a.clone(), b.clone()])
    }

    /// Produces a scope whose close closes every scope in `scopes`.
    #[must_use]
    pub fn merge_all(&self, scopes: impl IntoIterator<Item = ScopeHandle>) -> ScopeHandle {
        ScopeHandle::new(
            self.config.clone(),
            Arc::clone(&self.metrics),
            scopes.into_iter().collect(),
        )
    }

    /// Creates a child of `parent`, closed by the parent's close pass.
    pub fn fork_scope(&self, parent: &ScopeHandle) -> Result<ScopeHandle> {
        parent.fork()
    }

    /// Acquires a resource and registers its release into `cx`'s scope.
    /// See [`Cx::acquire_release`].
    pub fn acquire_release<R, A, F>(&self, cx: &Cx, acquire: A, release: F) -> Result<Arc<R>>
    where
        R: Send + Sync + 'static,
        A: FnOnce() -> Result<R>,
        F: FnOnce(&R, &TerminationSignal) -> Result<()> + Send + 'static,
    {
        cx.acquire_release(acquire, release)
    }

    // =========================================================================
    // Scoped execution
    // =========================================================================

    /// Runs `op` in a fresh scope and closes it with a signal derived from the
    /// outcome.
    ///
    /// `Ok(v)` closes with `Success(v)`, a cancellation error with `Cancelled`,
    /// any other error with `Failure`. If `op` panics the scope closes with a
    /// `Panicked` failure and the panic resumes afterwards; finalizer panics
    /// during that close are captured so `op`'s payload is the one resumed.
    pub fn run_scoped<T, F>(&self, op: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Cx) -> Result<T>,
    {
        self.run_scoped_with(CancelToken::new(), op)
    }

    /// Like [`run_scoped`](Self::run_scoped), observing cancellation through
    /// `token`.
    pub fn run_scoped_with<T, F>(&self, token: CancelToken, op: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Cx) -> Result<T>,
    {
        let scope = self.create_scope();
        let cx = Cx::new(scope.clone(), token);

        match catch_unwind(AssertUnwindSafe(|| op(&cx))) {
            Ok(result) => {
                let signal = cx.signal_for(&result);
                debug!(scope_id = %scope.id(), signal = %signal, "scoped operation finished");
                combine(result, scope.close(signal))
            }
            Err(payload) => {
                let err = Error::panicked(payload_to_string(&payload)).with_scope(scope.id());
                let signal = TerminationSignal::failure(err);
                if let Err(composite) = scope.close_capturing_panics(signal) {
                    warn!(
                        scope_id = %scope.id(),
                        error = %composite,
                        "finalizers failed while unwinding scoped operation"
                    );
                }
                resume_unwind(payload)
            }
        }
    }

    /// Runs the future produced by `op` in a fresh scope.
    ///
    /// The scope closes when the future completes, with the same signal
    /// mapping as [`run_scoped`](Self::run_scoped). Dropping the future
    /// before completion closes the scope with `Cancelled(Dropped)`; a panic
    /// inside it closes the scope with a `Panicked` failure.
    pub fn run_scoped_async<T, F, Fut>(&self, op: F) -> impl Future<Output = Result<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.create_scope();
        let cx = Cx::for_scope(scope.clone());
        let guard = CloseOnDrop { scope: Some(scope) };
        let fut = op(cx.clone());

        async move {
            let mut guard = guard;
            let result = fut.await;
            match guard.disarm() {
                Some(scope) => {
                    let signal = cx.signal_for(&result);
                    combine(result, scope.close(signal))
                }
                None => result,
            }
        }
    }
}

/// Closes the scope if the owning future never reaches completion.
struct CloseOnDrop {
    scope: Option<ScopeHandle>,
}

impl CloseOnDrop {
    fn disarm(&mut self) -> Option<ScopeHandle> {
        self.scope.take()
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        let unwinding = thread::panicking();
        let signal = if unwinding {
            TerminationSignal::failure(
                Error::panicked("scoped future panicked").with_scope(scope.id()),
            )
        } else {
            TerminationSignal::cancelled(CancelReason::dropped())
        };
        debug!(scope_id = %scope.id(), signal = %signal, "scoped future dropped before completion");
        // A panic escaping `drop` while unwinding aborts the process.
        let closed = if unwinding {
            scope.close_capturing_panics(signal)
        } else {
            scope.close(signal)
        };
        if let Err(composite) = closed {
            warn!(scope_id = %scope.id(), error = %composite, "finalizers failed after drop");
        }
    }
}

/// Merges an operation result with the close result of its scope.
fn combine<T>(result: Result<T>, closed: std::result::Result<(), CompositeFailure>) -> Result<T> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(composite)) => Err(composite.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(composite)) => {
            if err.has_source() {
                warn!(error = %composite, "finalizer failures not attached; operation error has a source");
                Err(err)
            } else {
                Err(err.with_source(composite))
            }
        }
    }
}
