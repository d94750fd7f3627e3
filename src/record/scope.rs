//! Scope record.
//!
//! A scope owns finalizers and child scopes. When it closes, it runs its
//! finalizers exactly once, in reverse registration order.

use crate::error::CompositeFailure;
use crate::record::finalizer::{Finalizer, FinalizerFn, FinalizerStack};
use crate::types::{FinalizerSeq, ScopeId, TerminationSignal};
use std::thread::ThreadId;

/// The state of a scope in its lifecycle.
///
/// State machine:
/// ```text
/// Open → Closing → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Scope is open and accepting finalizers.
    Open,
    /// A close pass is running finalizers.
    Closing,
    /// Terminal state with the recorded close result.
    Closed,
}

impl ScopeState {
    /// Returns true if the scope is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if the scope accepts finalizers unconditionally.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true while a close pass is running.
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::Closing)
    }
}

/// Internal record for a scope.
#[derive(Debug)]
pub struct ScopeRecord {
    /// Unique identifier for this scope.
    pub id: ScopeId,
    /// Current state.
    pub state: ScopeState,
    /// Pending finalizers, executed in LIFO order.
    pub finalizers: FinalizerStack,
    /// Child scopes created through `fork` that have not closed yet.
    pub children: Vec<ScopeId>,
    /// Signal the scope was closed with; `None` while open.
    close_signal: Option<TerminationSignal>,
    /// Outcome of the close pass; `None` until `Closed`.
    close_result: Option<Result<(), CompositeFailure>>,
    /// Thread driving the close pass.
    closer: Option<ThreadId>,
}

impl ScopeRecord {
    /// Creates a new open scope record.
    #[must_use]
    pub fn new(id: ScopeId) -> Self {
        Self {
            id,
            state: ScopeState::Open,
            finalizers: FinalizerStack::new(),
            children: Vec::new(),
            close_signal: None,
            close_result: None,
            closer: None,
        }
    }

    /// Adds a finalizer and returns its registration stamp.
    pub fn add_finalizer(&mut self, action: FinalizerFn) -> FinalizerSeq {
        self.finalizers.push_action(action)
    }

    /// Pops the next finalizer to run (LIFO order).
    pub fn pop_finalizer(&mut self) -> Option<Finalizer> {
        self.finalizers.pop()
    }

    /// Returns the number of pending finalizers.
    #[must_use]
    pub fn finalizer_count(&self) -> usize {
        self.finalizers.len()
    }

    /// Records a child scope.
    pub fn add_child(&mut self, child: ScopeId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    /// Forgets a child once it has closed.
    pub fn remove_child(&mut self, child: ScopeId) {
        self.children.retain(|id| *id != child);
    }

    /// Returns the signal recorded at close time.
    #[must_use]
    pub const fn close_signal(&self) -> Option<&TerminationSignal> {
        self.close_signal.as_ref()
    }

    /// Returns the recorded close result once `Closed`.
    #[must_use]
    pub const fn close_result(&self) -> Option<&Result<(), CompositeFailure>> {
        self.close_result.as_ref()
    }

    /// Returns the thread running the close pass, if any.
    #[must_use]
    pub const fn closer(&self) -> Option<ThreadId> {
        self.closer
    }

    /// Begins the closing process.
    ///
    /// Returns true if the state changed; only the caller that observes
    /// `true` may run the finalizers.
    pub fn begin_close(&mut self, signal: TerminationSignal, closer: ThreadId) -> bool {
        if self.state == ScopeState::Open {
            self.state = ScopeState::Closing;
            self.close_signal = Some(signal);
            self.closer = Some(closer);
            true
        } else {
            false
        }
    }

    /// Transitions from Closing to Closed, recording the pass result.
    ///
    /// Returns true if the state changed.
    pub fn complete_close(&mut self, result: Result<(), CompositeFailure>) -> bool {
        if self.state == ScopeState::Closing {
            self.state = ScopeState::Closed;
            self.close_result = Some(result);
            self.closer = None;
            true
        } else {
            false
        }
    }
}
