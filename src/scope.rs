//! Shared scope handles.
//!
//! A [`ScopeHandle`] is a cheaply clonable reference to one scope record.
//! Any number of threads or tasks may hold handles to the same scope, register
//! finalizers through them, and race to close it; the `Open → Closing`
//! transition elects exactly one closer.
//!
//! # Close pass
//!
//! The elected closer repeatedly pops the most recently registered entry and
//! runs it with the lock released, so finalizers may register further
//! finalizers or close other scopes. Every failure is collected; nothing
//! short-circuits the pass. Other callers of [`close`](ScopeHandle::close)
//! block until the pass finishes and then return the same recorded result.
//! A finalizer that closes its own scope observes `Ok(())` immediately.
//!
//! # Merged scopes
//!
//! A merged scope owns strong references to its constituents. Closing it
//! enlists every constituent that is still open, then runs one reverse pass
//! over the union of their entries ordered by registration stamp, exactly as
//! if everything had been registered into a single list. A constituent that
//! another thread is already closing is waited for, and its failures are
//! folded into the merged result.
//!
//! # Child scopes
//!
//! [`fork`](ScopeHandle::fork) registers an entry in the parent that closes
//! the child with the parent's signal. Parent and child only hold weak
//! references to each other, so neither keeps the other alive.
//!
//! # Finalizer panics
//!
//! With `catch_finalizer_panics` disabled the first finalizer panic resumes
//! once the pass has finished. A close that happens while the calling thread
//! is already unwinding always captures finalizer panics as failures.

use crate::config::{LateRegistration, ScopeConfig};
use crate::error::{CompositeFailure, Error, Result};
use crate::observability::ScopeMetrics;
use crate::record::finalizer::PanicPayload;
use crate::record::{Finalizer, FinalizerRun, ScopeRecord, ScopeState};
use crate::types::{ScopeId, TerminationSignal};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, trace, warn};

pub(crate) struct ScopeShared {
    id: ScopeId,
    record: Mutex<ScopeRecord>,
    closed: Condvar,
    constituents: Vec<ScopeHandle>,
    parent: Option<WeakScopeHandle>,
    config: ScopeConfig,
    metrics: Arc<ScopeMetrics>,
}

impl Drop for ScopeShared {
    fn drop(&mut self) {
        let record = self.record.get_mut();
        if record.state.is_open() && record.finalizer_count() > 0 {
            warn!(
                scope_id = %self.id,
                pending = record.finalizer_count(),
                "scope dropped without being closed; pending finalizers will never run"
            );
        }
    }
}

/// A shared handle to a scope.
#[derive(Clone)]
pub struct ScopeHandle {
    inner: Arc<ScopeShared>,
}

/// A weak handle that does not keep the scope alive.
#[derive(Clone)]
pub struct WeakScopeHandle {
    id: ScopeId,
    inner: Weak<ScopeShared>,
}

impl WeakScopeHandle {
    /// Returns the id of the referenced scope.
    #[must_use]
    pub const fn id(&self) -> ScopeId {
        self.id
    }

    /// Upgrades to a strong handle if the scope is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ScopeHandle> {
        self.inner.upgrade().map(|inner| ScopeHandle { inner })
    }
}

impl std::fmt::Debug for WeakScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WeakScopeHandle").field(&self.id).finish()
    }
}

/// How a call to close ended for the caller.
enum CloseOutcome {
    /// This call ran the pass.
    Ran(std::result::Result<(), CompositeFailure>),
    /// Another call ran (or is running) the pass.
    Observed(std::result::Result<(), CompositeFailure>),
}

impl CloseOutcome {
    fn into_result(self) -> std::result::Result<(), CompositeFailure> {
        match self {
            Self::Ran(result) | Self::Observed(result) => result,
        }
    }
}

impl ScopeHandle {
    pub(crate) fn new(
        config: ScopeConfig,
        metrics: Arc<ScopeMetrics>,
        constituents: Vec<Self>,
    ) -> Self {
        Self::build(config, metrics, constituents, None)
    }

    fn build(
        config: ScopeConfig,
        metrics: Arc<ScopeMetrics>,
        constituents: Vec<Self>,
        parent: Option<WeakScopeHandle>,
    ) -> Self {
        let id = ScopeId::next();
        metrics.record_created();
        debug!(
            scope_id = %id,
            constituents = constituents.len(),
            policy = %config.late_registration,
            "scope created"
        );
        Self {
            inner: Arc::new(ScopeShared {
                id,
                record: Mutex::new(ScopeRecord::new(id)),
                closed: Condvar::new(),
                constituents,
                parent,
                config,
                metrics,
            }),
        }
    }

    /// Creates a standalone scope with its own metrics.
    #[must_use]
    pub fn standalone(config: ScopeConfig) -> Self {
        Self::new(config, Arc::new(ScopeMetrics::new()), Vec::new())
    }

    /// Returns the scope id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.inner.record.lock().state
    }

    /// Returns true if the scope is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Returns true once the close pass has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns the number of finalizers waiting to run.
    #[must_use]
    pub fn finalizer_count(&self) -> usize {
        self.inner.record.lock().finalizer_count()
    }

    /// Returns the ids of child scopes created through [`fork`](Self::fork)
    /// that have not closed yet.
    #[must_use]
    pub fn children(&self) -> Vec<ScopeId> {
        self.inner.record.lock().children.clone()
    }

    /// Returns the ids of the scopes this scope was merged from.
    #[must_use]
    pub fn constituents(&self) -> Vec<ScopeId> {
        self.inner.constituents.iter().map(Self::id).collect()
    }

    /// Returns the signal the scope was closed with.
    #[must_use]
    pub fn close_signal(&self) -> Option<TerminationSignal> {
        self.inner.record.lock().close_signal().cloned()
    }

    /// Returns the recorded close result once the scope is `Closed`.
    #[must_use]
    pub fn close_result(&self) -> Option<std::result::Result<(), CompositeFailure>> {
        self.inner.record.lock().close_result().cloned()
    }

    /// Returns the configuration this scope was created with.
    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.inner.config
    }

    /// Returns a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakScopeHandle {
        WeakScopeHandle {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns true if both handles refer to the same scope.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a finalizer to run when the scope closes.
    ///
    /// While the scope is open the entry is appended with the next
    /// registration stamp. After close began the configured
    /// [`LateRegistration`] policy decides:
    ///
    /// - `Strict`: fails with [`ErrorKind::ScopeClosed`](crate::error::ErrorKind::ScopeClosed).
    /// - `Lenient`: during `Closing` the entry is appended and the running pass
    ///   runs it next; after `Closed` it runs immediately with the recorded
    ///   signal, and a failure is logged rather than returned.
    pub fn add_finalizer<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&TerminationSignal) -> Result<()> + Send + 'static,
    {
        let metrics = &self.inner.metrics;
        let mut record = self.inner.record.lock();
        match (record.state, self.inner.config.late_registration) {
            (ScopeState::Open, _) => {
                let seq = record.add_finalizer(Box::new(f));
                metrics.finalizers_registered.increment();
                trace!(scope_id = %self.inner.id, seq = %seq, "finalizer registered");
                Ok(())
            }
            (_, LateRegistration::Strict) => {
                metrics.rejected_registrations.increment();
                debug!(
                    scope_id = %self.inner.id,
                    state = ?record.state,
                    "late finalizer registration rejected"
                );
                Err(Error::scope_closed(self.inner.id))
            }
            (ScopeState::Closing, LateRegistration::Lenient) => {
                let seq = record.add_finalizer(Box::new(f));
                metrics.finalizers_registered.increment();
                metrics.late_registrations.increment();
                debug!(
                    scope_id = %self.inner.id,
                    seq = %seq,
                    "late finalizer accepted into running close pass"
                );
                Ok(())
            }
            (ScopeState::Closed, LateRegistration::Lenient) => {
                let signal = record.close_signal().cloned().ok_or_else(|| {
                    Error::invalid_state(self.inner.id, "closed scope has no recorded signal")
                })?;
                drop(record);
                metrics.finalizers_registered.increment();
                metrics.late_registrations.increment();
                metrics.finalizers_run.increment();
                debug!(
                    scope_id = %self.inner.id,
                    signal = signal.label(),
                    "late finalizer runs after close"
                );
                let finalizer = Finalizer::new(crate::types::FinalizerSeq::next(), Box::new(f));
                if let Some(err) = settle(finalizer.run(&signal), self.captures_panics()) {
                    metrics.finalizer_failures.increment();
                    warn!(
                        scope_id = %self.inner.id,
                        error = %err,
                        "late finalizer failed after close"
                    );
                }
                Ok(())
            }
        }
    }

    /// Whether a close started now keeps finalizer panics as failures.
    fn captures_panics(&self) -> bool {
        self.inner.config.catch_finalizer_panics || thread::panicking()
    }


    // =========================================================================
    // Child and merged scopes
    // =========================================================================

    /// Creates a child scope closed by this scope's close pass.
    ///
    /// The closing entry is registered now, so the child closes at the point
    /// of the parent's reverse pass that matches its creation time. A child
    /// closed earlier on its own contributes nothing to the parent's result.
    pub fn fork(&self) -> Result<Self> {
        let child = Self::build(
            self.inner.config.clone(),
            Arc::clone(&self.inner.metrics),
            Vec::new(),
            Some(self.downgrade()),
        );
        let weak = child.downgrade();
        let mut record = self.inner.record.lock();
        if !record.state.is_open() {
            drop(record);
            // Never handed out; retire it so the open-scope gauge stays honest.
            if let Err(composite) = child.close(TerminationSignal::cancelled(
                crate::types::CancelReason::parent_closed(),
            )) {
                debug!(
                    child = %child.id(),
                    error = %composite,
                    "unused child closed with failures"
                );
            }
            return Err(Error::scope_closed(self.inner.id));
        }
        record.add_finalizer(Box::new(move |signal| match weak.upgrade() {
            Some(child) => child.close_from_parent(signal),
            None => Ok(()),
        }));
        record.add_child(child.id());
        self.inner.metrics.finalizers_registered.increment();
        debug!(parent = %self.inner.id, child = %child.id(), "child scope forked");
        Ok(child)
    }

    fn close_from_parent(&self, signal: &TerminationSignal) -> Result<()> {
        match self.close_pass(signal.clone(), self.captures_panics()) {
            CloseOutcome::Ran(Err(composite)) => Err(composite.into()),
            CloseOutcome::Ran(Ok(())) | CloseOutcome::Observed(_) => Ok(()),
        }
    }

    /// Produces a scope whose close closes both `self` and `other`.
    ///
    /// Entries of both run in one reverse pass ordered by registration stamp.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self::merge_all([self.clone(), other.clone()])
    }

    /// Produces a scope whose close closes every scope in `scopes`.
    #[must_use]
    pub fn merge_all(scopes: impl IntoIterator<Item = Self>) -> Self {
        let constituents: Vec<Self> = scopes.into_iter().collect();
        let (config, metrics) = constituents.first().map_or_else(
            || (ScopeConfig::default(), Arc::new(ScopeMetrics::new())),
            |first| {
                (
                    first.inner.config.clone(),
                    Arc::clone(&first.inner.metrics),
                )
            },
        );
        Self::new(config, metrics, constituents)
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Closes the scope with `signal`.
    ///
    /// Runs every pending finalizer once, most recent first, each receiving
    /// `signal`. All finalizers run even when earlier ones fail; failures are
    /// combined into a [`CompositeFailure`]. Closing an already closed scope
    /// is a no-op that returns the originally recorded result.
    pub fn close(&self, signal: TerminationSignal) -> std::result::Result<(), CompositeFailure> {
        self.close_pass(signal, self.captures_panics()).into_result()
    }

    /// Closes the scope for a caller that is unwinding from a panic.
    ///
    /// Same as [`close`](Self::close), except that finalizer panics are always
    /// captured as failures so the caller's own panic is the one that resumes.
    pub(crate) fn close_capturing_panics(
        &self,
        signal: TerminationSignal,
    ) -> std::result::Result<(), CompositeFailure> {
        self.close_pass(signal, true).into_result()
    }

    fn close_pass(&self, signal: TerminationSignal, capture: bool) -> CloseOutcome {
        let me = thread::current().id();
        {
            let mut record = self.inner.record.lock();
            if !record.begin_close(signal.clone(), me) {
                return self.await_closed(record);
            }
        }

        let mut participants = vec![self.clone()];
        let mut elsewhere = Vec::new();
        for constituent in &self.inner.constituents {
            constituent.enlist(&signal, me, &mut participants, &mut elsewhere);
        }

        debug!(
            scope_id = %self.inner.id,
            participants = participants.len(),
            closing_elsewhere = elsewhere.len(),
            signal = signal.label(),
            "close pass started"
        );

        let (mut failures, panic) = self.run_pass(&participants, &signal, capture);
        let pass_result =
            CompositeFailure::from_failures(self.inner.id, failures.clone()).map_or(Ok(()), Err);

        // Constituents first so a waiter on the merged scope sees them closed,
        // and so a closer waiting on one of ours is never blocked by us.
        let mut stragglers = Vec::new();
        for participant in participants.iter().skip(1).rev() {
            stragglers.extend(participant.finish(pass_result.clone()));
        }
        for constituent in &elsewhere {
            if let Err(composite) = constituent.wait_closed() {
                failures.extend(composite.failures().iter().cloned());
            }
        }
        let result = CompositeFailure::from_failures(self.inner.id, failures).map_or(Ok(()), Err);
        stragglers.extend(self.finish(result.clone()));
        self.run_stragglers(stragglers, &signal, capture);

        match &result {
            Ok(()) => debug!(scope_id = %self.inner.id, "scope closed"),
            Err(composite) => warn!(
                scope_id = %self.inner.id,
                failures = composite.len(),
                "scope closed with finalizer failures"
            ),
        }

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        CloseOutcome::Ran(result)
    }

    /// Moves this scope (and, transitively, its open constituents) into the
    /// pass driven by `closer`.
    ///
    /// A constituent mid-pass on another thread goes to `elsewhere` so the
    /// merged close can wait for it. One closed already, or being closed
    /// further up this thread's stack, is left alone.
    fn enlist(
        &self,
        signal: &TerminationSignal,
        closer: thread::ThreadId,
        out: &mut Vec<Self>,
        elsewhere: &mut Vec<Self>,
    ) {
        if out.iter().chain(elsewhere.iter()).any(|p| p.ptr_eq(self)) {
            return;
        }
        {
            let mut record = self.inner.record.lock();
            if !record.begin_close(signal.clone(), closer) {
                if record.state.is_closing() && record.closer() != Some(closer) {
                    trace!(scope_id = %self.inner.id, "constituent closing on another thread");
                    elsewhere.push(self.clone());
                } else {
                    trace!(
                        scope_id = %self.inner.id,
                        "constituent closed or closing on this thread; skipped"
                    );
                }
                return;
            }
        }
        out.push(self.clone());
        for constituent in &self.inner.constituents {
            constituent.enlist(signal, closer, out, elsewhere);
        }
    }

    /// Blocks until another thread's pass over this scope has finished.
    fn wait_closed(&self) -> std::result::Result<(), CompositeFailure> {
        let mut record = self.inner.record.lock();
        while !record.state.is_terminal() {
            self.inner.closed.wait(&mut record);
        }
        record.close_result().cloned().unwrap_or(Ok(()))
    }

    fn await_closed(&self, record: parking_lot::MutexGuard<'_, ScopeRecord>) -> CloseOutcome {
        if record.state.is_closing() && record.closer() == Some(thread::current().id()) {
            trace!(scope_id = %self.inner.id, "re-entrant close observed");
            return CloseOutcome::Observed(Ok(()));
        }
        drop(record);
        CloseOutcome::Observed(self.wait_closed())
    }

    /// Marks the scope closed and hands back entries that arrived after the
    /// pass drained the stack.
    fn finish(
        &self,
        result: std::result::Result<(), CompositeFailure>,
    ) -> Vec<(ScopeId, Finalizer)> {
        let (changed, leftover) = {
            let mut record = self.inner.record.lock();
            let leftover = record.finalizers.drain_lifo();
            (record.complete_close(result), leftover)
        };
        if changed {
            self.inner.metrics.record_closed();
            if let Some(parent) = self.inner.parent.as_ref().and_then(WeakScopeHandle::upgrade) {
                parent.inner.record.lock().remove_child(self.inner.id);
            }
        }
        self.inner.closed.notify_all();
        leftover.into_iter().map(|f| (self.inner.id, f)).collect()
    }

    /// Runs lenient registrations that raced the end of the pass, as if they
    /// had arrived after close.
    fn run_stragglers(
        &self,
        mut stragglers: Vec<(ScopeId, Finalizer)>,
        signal: &TerminationSignal,
        capture: bool,
    ) {
        stragglers.sort_by_key(|(_, f)| std::cmp::Reverse(f.seq()));
        for (owner, finalizer) in stragglers {
            self.inner.metrics.finalizers_run.increment();
            if let Some(err) = settle(finalizer.run(signal), capture) {
                self.inner.metrics.finalizer_failures.increment();
                warn!(scope_id = %owner, error = %err, "late finalizer failed after close");
            }
        }
    }

    fn run_pass(
        &self,
        participants: &[Self],
        signal: &TerminationSignal,
        capture: bool,
    ) -> (Vec<Error>, Option<PanicPayload>) {
        let metrics = &self.inner.metrics;
        let mut failures = Vec::new();
        let mut first_panic = None;

        while let Some((owner, finalizer)) = pop_latest(participants) {
            let seq = finalizer.seq();
            trace!(scope_id = %owner, seq = %seq, "running finalizer");
            metrics.finalizers_run.increment();
            let err = match finalizer.run(signal) {
                FinalizerRun::Completed => continue,
                FinalizerRun::Failed(err) => err,
                FinalizerRun::Panicked(err, payload) => {
                    if !capture && first_panic.is_none() {
                        first_panic = Some(payload);
                    }
                    err
                }
            };
            metrics.finalizer_failures.increment();
            warn!(scope_id = %owner, seq = %seq, error = %err, "finalizer failed");
            failures.push(err.with_scope(owner));
        }

        (failures, first_panic)
    }
}

/// Turns a finalizer run into an optional failure, resuming the panic
/// unless `capture` is set.
fn settle(run: FinalizerRun, capture: bool) -> Option<Error> {
    match run {
        FinalizerRun::Completed => None,
        FinalizerRun::Failed(err) => Some(err),
        FinalizerRun::Panicked(err, _) if capture => Some(err),
        FinalizerRun::Panicked(_, payload) => std::panic::resume_unwind(payload),
    }
}

/// Pops the most recently registered entry across all participants.
fn pop_latest(participants: &[ScopeHandle]) -> Option<(ScopeId, Finalizer)> {
    let newest = participants
        .iter()
        .filter_map(|p| p.inner.record.lock().finalizers.peek_seq().map(|seq| (seq, p)))
        .max_by_key(|(seq, _)| *seq)
        .map(|(_, p)| p)?;
    let finalizer = newest.inner.record.lock().pop_finalizer()?;
    Some((newest.inner.id, finalizer))
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.inner.record.lock();
        f.debug_struct("ScopeHandle")
            .field("id", &self.inner.id)
            .field("state", &record.state)
            .field("finalizers", &record.finalizer_count())
            .field("constituents", &self.inner.constituents.len())
            .finish()
    }
}
