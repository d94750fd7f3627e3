//! Error types and error handling strategy for scopekeeper.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Finalizer failures are collected, never thrown inline
//! - Panics inside finalizers are captured and converted to [`ErrorKind::Panicked`]
//!
//! # Error Categories
//!
//! - **Cancellation**: Operation cancelled by request
//! - **Scope**: Lifecycle errors (late registration, invalid transitions)
//! - **Finalizer**: One or more finalizers failed during a close pass
//! - **Resource**: Acquisition of a scoped resource failed
//! - **Config**: Invalid configuration values

use core::fmt;
use std::sync::Arc;

use crate::types::{CancelReason, ScopeId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Operation was cancelled.
    Cancelled,

    // === Scopes ===
    /// Finalizer registration was rejected because the scope is no longer open.
    ScopeClosed,
    /// A scope record was found in a state its lifecycle cannot produce.
    InvalidStateTransition,

    // === Finalizers ===
    /// One or more finalizers failed during a close pass.
    FinalizerFailed,
    /// A finalizer or scoped operation panicked.
    Panicked,

    // === Resources ===
    /// The acquire step of a scoped resource failed.
    AcquireFailed,

    // === Configuration ===
    /// Configuration value could not be parsed or applied.
    Config,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::ScopeClosed | Self::InvalidStateTransition => ErrorCategory::Scope,
            Self::FinalizerFailed | Self::Panicked => ErrorCategory::Finalizer,
            Self::AcquireFailed => ErrorCategory::Resource,
            Self::Config => ErrorCategory::Config,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if this kind signals a programmer error rather than a
    /// runtime condition.
    #[must_use]
    pub const fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::ScopeClosed | Self::InvalidStateTransition
        )
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation-related failures.
    Cancellation,
    /// Scope lifecycle failures.
    Scope,
    /// Finalizer failures.
    Finalizer,
    /// Resource acquisition failures.
    Resource,
    /// Configuration failures.
    Config,
    /// User-originated errors.
    User,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The scope the error was raised against.
    pub scope_id: Option<ScopeId>,
}

/// The main error type for scopekeeper operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext { scope_id: None },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error came from a captured panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self.kind, ErrorKind::Panicked)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Records the scope this error belongs to.
    #[must_use]
    pub fn with_scope(mut self, scope_id: ScopeId) -> Self {
        self.context.scope_id = Some(scope_id);
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns true if a source error is attached.
    #[must_use]
    pub const fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(format!("{reason}"))
    }

    /// Creates a late-registration error for a scope that is no longer open.
    #[must_use]
    pub fn scope_closed(scope_id: ScopeId) -> Self {
        Self::new(ErrorKind::ScopeClosed)
            .with_message(format!("finalizer registered on {scope_id} after close began"))
            .with_scope(scope_id)
    }

    /// Creates an acquisition failure wrapping the underlying cause.
    #[must_use]
    pub fn acquire_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::AcquireFailed).with_message(detail)
    }

    /// Creates an error from a caught panic message.
    #[must_use]
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(message)
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }

    /// Creates an error for a scope whose recorded state is inconsistent.
    #[must_use]
    pub fn invalid_state(scope_id: ScopeId, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateTransition)
            .with_message(detail)
            .with_scope(scope_id)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// The combined failures of a single close pass.
///
/// Failures are kept in the order the finalizers ran (reverse registration
/// order), so the first entry belongs to the most recently registered
/// finalizer that failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} finalizer(s) failed while closing {scope_id}: {}", .failures.len(), summarize(.failures))]
pub struct CompositeFailure {
    scope_id: ScopeId,
    failures: Vec<Error>,
}

fn summarize(failures: &[Error]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CompositeFailure {
    /// Creates a composite from the failures collected while closing `scope_id`.
    ///
    /// Returns `None` when no finalizer failed.
    #[must_use]
    pub fn from_failures(scope_id: ScopeId, failures: Vec<Error>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { scope_id, failures })
        }
    }

    /// Returns the scope whose close pass produced these failures.
    #[must_use]
    pub const fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    /// Returns the individual failures in execution order.
    #[must_use]
    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    /// Returns the number of failed finalizers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// A composite always holds at least one failure.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns true if any failure message contains `needle`.
    #[must_use]
    pub fn contains_message(&self, needle: &str) -> bool {
        self.failures
            .iter()
            .any(|e| e.message().is_some_and(|m| m.contains(needle)))
    }
}

impl From<CompositeFailure> for Error {
    fn from(composite: CompositeFailure) -> Self {
        let scope_id = composite.scope_id;
        Self::new(ErrorKind::FinalizerFailed)
            .with_message(composite.to_string())
            .with_scope(scope_id)
            .with_source(composite)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for scopekeeper operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
