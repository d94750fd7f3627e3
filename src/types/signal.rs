//! Three-valued termination signal handed to finalizers.
//!
//! When a scope closes, every finalizer receives the signal the scope was
//! closed with:
//!
//! - `Success(value)`: the work inside the scope completed with a value
//! - `Failure(error)`: the work failed
//! - `Cancelled(reason)`: the work was cancelled
//!
//! These form a severity lattice: `Success < Failure < Cancelled`.

use super::cancel::CancelReason;
use crate::error::Error;
use core::any::Any;
use core::fmt;
use std::sync::Arc;

/// Type-erased success payload.
///
/// Cloning is cheap (reference-counted). Finalizers that care about the
/// concrete value use [`downcast_ref`](Self::downcast_ref).
#[derive(Clone)]
pub struct SuccessValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl SuccessValue {
    /// Wraps a value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: core::any::type_name::<T>(),
        }
    }

    /// Returns a reference to the value if it is of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns true if the value is of type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Returns the Rust type name of the wrapped value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for SuccessValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SuccessValue(<{}>)", self.type_name)
    }
}

/// The outcome a scope was closed with.
#[derive(Debug, Clone)]
pub enum TerminationSignal {
    /// The scoped work succeeded.
    Success(SuccessValue),
    /// The scoped work failed.
    Failure(Error),
    /// The scoped work was cancelled.
    Cancelled(CancelReason),
}

impl TerminationSignal {
    /// Creates a success signal carrying `value`.
    #[must_use]
    pub fn success<T: Any + Send + Sync>(value: T) -> Self {
        Self::Success(SuccessValue::new(value))
    }

    /// Creates a success signal carrying `()`.
    #[must_use]
    pub fn unit() -> Self {
        Self::success(())
    }

    /// Creates a failure signal.
    #[must_use]
    pub const fn failure(error: Error) -> Self {
        Self::Failure(error)
    }

    /// Creates a cancellation signal.
    #[must_use]
    pub const fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }

    /// Derives the signal for an operation result.
    ///
    /// Errors of kind [`Cancelled`](crate::error::ErrorKind::Cancelled) map to
    /// a cancellation signal; every other error is a failure.
    #[must_use]
    pub fn from_result<T: Any + Send + Sync + Clone>(result: &Result<T, Error>) -> Self {
        match result {
            Ok(value) => Self::success(value.clone()),
            Err(err) if err.is_cancelled() => Self::Cancelled(CancelReason::default()),
            Err(err) => Self::Failure(err.clone()),
        }
    }

    /// Returns the severity level of this signal (0 = Success, 2 = Cancelled).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Success(_) => 0,
            Self::Failure(_) => 1,
            Self::Cancelled(_) => 2,
        }
    }

    /// Returns true if this is `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this is `Failure`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if this is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the success value if it is of type `T`.
    #[must_use]
    pub fn success_value<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Success(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn failure_cause(&self) -> Option<&Error> {
        match self {
            Self::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Short label used in log fields.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => write!(f, "success <{}>", value.type_name()),
            Self::Failure(err) => write!(f, "failure: {err}"),
            Self::Cancelled(reason) => write!(f, "cancelled: {reason}"),
        }
    }
}
