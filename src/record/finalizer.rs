//! Finalizer types for scope cleanup.
//!
//! Finalizers are cleanup handlers that run when a scope closes. They are
//! executed in LIFO (last-in, first-out) order to ensure resources are
//! released in the reverse order they were acquired.

use crate::error::{Error, Result};
use crate::types::{FinalizerSeq, TerminationSignal};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Boxed cleanup action invoked with the scope's termination signal.
pub type FinalizerFn = Box<dyn FnOnce(&TerminationSignal) -> Result<()> + Send>;

/// Payload of a panic raised by a finalizer.
pub type PanicPayload = Box<dyn std::any::Any + Send>;

/// A finalizer entry registered against a scope.
pub struct Finalizer {
    seq: FinalizerSeq,
    action: FinalizerFn,
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizer")
            .field("seq", &self.seq)
            .field("action", &"<closure>")
            .finish()
    }
}

/// How a single finalizer invocation ended.
pub enum FinalizerRun {
    /// The action returned `Ok`.
    Completed,
    /// The action returned an error.
    Failed(Error),
    /// The action panicked. The payload is kept so the caller can resume it.
    Panicked(Error, PanicPayload),
}

impl Finalizer {
    /// Creates a finalizer entry with an explicit sequence number.
    #[must_use]
    pub fn new(seq: FinalizerSeq, action: FinalizerFn) -> Self {
        Self { seq, action }
    }

    /// Returns the registration stamp.
    #[must_use]
    pub const fn seq(&self) -> FinalizerSeq {
        self.seq
    }

    /// Consumes the entry, running its action exactly once.
    ///
    /// Panics are always caught here so one broken finalizer cannot abort the
    /// remaining ones.
    pub fn run(self, signal: &TerminationSignal) -> FinalizerRun {
        let action = self.action;
        match catch_unwind(AssertUnwindSafe(move || action(signal))) {
            Ok(Ok(())) => FinalizerRun::Completed,
            Ok(Err(err)) => FinalizerRun::Failed(err),
            Err(payload) => {
                let err = Error::panicked(payload_to_string(&payload));
                FinalizerRun::Panicked(err, payload)
            }
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn payload_to_string(payload: &PanicPayload) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// A stack of finalizers with LIFO semantics.
///
/// Entries are kept sorted by sequence number, so [`pop`](Self::pop) always
/// yields the most recently registered entry.
#[derive(Debug, Default)]
pub struct FinalizerStack {
    finalizers: Vec<Finalizer>,
}

impl FinalizerStack {
    /// Creates a new empty finalizer stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a finalizer, keeping sequence order.
    pub fn push(&mut self, finalizer: Finalizer) {
        let at = self
            .finalizers
            .iter()
            .rposition(|f| f.seq < finalizer.seq)
            .map_or(0, |idx| idx + 1);
        self.finalizers.insert(at, finalizer);
    }

    /// Stamps an action with the next sequence number and pushes it.
    pub fn push_action(&mut self, action: FinalizerFn) -> FinalizerSeq {
        let seq = FinalizerSeq::next();
        self.push(Finalizer::new(seq, action));
        seq
    }

    /// Pops the most recently registered finalizer.
    pub fn pop(&mut self) -> Option<Finalizer> {
        self.finalizers.pop()
    }

    /// Removes every pending finalizer, most recent first.
    pub fn drain_lifo(&mut self) -> Vec<Finalizer> {
        let mut drained = std::mem::take(&mut self.finalizers);
        drained.reverse();
        drained
    }

    /// Returns the sequence number [`pop`](Self::pop) would yield next.
    #[must_use]
    pub fn peek_seq(&self) -> Option<FinalizerSeq> {
        self.finalizers.last().map(Finalizer::seq)
    }

    /// Returns the number of pending finalizers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    /// Returns true if there are no pending finalizers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(order: &Arc<Mutex<Vec<u32>>>, id: u32) -> FinalizerFn {
        let order = Arc::clone(order);
        Box::new(move |_| {
            order.lock().unwrap().push(id);
            Ok(())
        })
    }

    #[test]
    fn finalizer_stack_lifo_order() {
        let mut stack = FinalizerStack::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        stack.push_action(recorder(&order, 1));
        stack.push_action(recorder(&order, 2));
        stack.push_action(recorder(&order, 3));

        let signal = TerminationSignal::unit();
        while let Some(finalizer) = stack.pop() {
            assert!(matches!(finalizer.run(&signal), FinalizerRun::Completed));
        }

        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn finalizer_stack_empty() {
        let mut stack = FinalizerStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.len(), 0);
        assert!(stack.pop().is_none());
        assert!(stack.peek_seq().is_none());
    }

    #[test]
    fn out_of_order_push_is_sorted() {
        let mut stack = FinalizerStack::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        stack.push(Finalizer::new(FinalizerSeq::new_for_test(20), recorder(&order, 20)));
        stack.push(Finalizer::new(FinalizerSeq::new_for_test(5), recorder(&order, 5)));
        stack.push(Finalizer::new(FinalizerSeq::new_for_test(12), recorder(&order, 12)));

        assert_eq!(stack.peek_seq(), Some(FinalizerSeq::new_for_test(20)));
        let signal = TerminationSignal::unit();
        while let Some(finalizer) = stack.pop() {
            let _ = finalizer.run(&signal);
        }
        assert_eq!(*order.lock().unwrap(), vec![20, 12, 5]);
    }

    #[test]
    fn drain_lifo_empties_newest_first() {
        let mut stack = FinalizerStack::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = stack.push_action(recorder(&order, 1));
        let second = stack.push_action(recorder(&order, 2));

        let drained: Vec<_> = stack.drain_lifo().iter().map(Finalizer::seq).collect();
        assert_eq!(drained, vec![second, first]);
        assert!(stack.is_empty());
    }

    #[test]
    fn run_captures_error_and_panic() {
        let signal = TerminationSignal::unit();

        let failing = Finalizer::new(
            FinalizerSeq::new_for_test(1),
            Box::new(|_| Err(Error::user("boom"))),
        );
        match failing.run(&signal) {
            FinalizerRun::Failed(err) => assert_eq!(err.message(), Some("boom")),
            _ => panic!("expected failure"),
        }

        let panicking = Finalizer::new(
            FinalizerSeq::new_for_test(2),
            Box::new(|_| -> Result<()> { panic!("bang") }),
        );
        match panicking.run(&signal) {
            FinalizerRun::Panicked(err, _) => {
                assert!(err.is_panic());
                assert_eq!(err.message(), Some("bang"));
            }
            _ => panic!("expected panic capture"),
        }
    }

    #[test]
    fn finalizer_debug_impl() {
        let finalizer = Finalizer::new(FinalizerSeq::new_for_test(9), Box::new(|_| Ok(())));
        let debug_str = format!("{finalizer:?}");
        assert!(debug_str.contains("FinalizerSeq(9)"));
        assert!(debug_str.contains("<closure>"));
    }
}
