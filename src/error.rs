//! Error types and error-handling strategy for the deferred-value engine.
//!
//! The engine works with a closed set of error kinds. Error handling follows
//! these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Programmer errors (`Ownership`, `CrossBarrier`) surface synchronously
//!   from the API call that detects them, without scheduling anything
//! - Everything raised by user callbacks is wrapped as a `User` rejection

use core::fmt;
use std::sync::Arc;

use crate::types::CancelReason;

/// The kind of error. This set is closed: every rejection flowing through
/// the engine carries exactly one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Second consumer attached to a non-shared deferred.
    Ownership,
    /// A deferred was used outside the barrier that owns it.
    CrossBarrier,
    /// Every parent of a `when_any` rejected.
    AllFailed,
    /// A `when_some` can no longer reach its quorum.
    Insufficient,
    /// The deferred was settled by cancellation; carries a reason in context.
    Cancelled,
    /// The barrier was interrupted from outside while running.
    Interrupted,
    /// A time limit elapsed before the operation settled.
    Timeout,
    /// An error raised by a user callback, wrapping the original.
    User,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ownership => "ownership",
            Self::CrossBarrier => "cross-barrier",
            Self::AllFailed => "all-failed",
            Self::Insufficient => "insufficient",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
            Self::Timeout => "timeout",
            Self::User => "user",
        };
        f.write_str(name)
    }
}

/// The main error type for engine operations and deferred rejections.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context text, if any.
    #[must_use]
    pub fn context_text(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates an ownership-violation error.
    #[must_use]
    pub fn ownership(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::Ownership).with_context(ctx)
    }

    /// Creates a cross-barrier error.
    #[must_use]
    pub fn cross_barrier(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::CrossBarrier).with_context(ctx)
    }

    /// Creates a user-kind error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(msg)
    }

    /// Creates a cancellation error from a structured reason.
    ///
    /// A reason of kind `interrupt` maps to [`ErrorKind::Interrupted`]; all
    /// other reasons map to [`ErrorKind::Cancelled`].
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        let kind = if reason.is_interrupt() {
            ErrorKind::Interrupted
        } else {
            ErrorKind::Cancelled
        };
        Self::new(kind).with_context(format!("{reason}"))
    }

    /// Coerces an arbitrary callback error into the `User` kind.
    ///
    /// `User`-kind errors pass through unchanged; anything else becomes the
    /// source of a fresh `User` error, so the original kind stays inspectable
    /// through the chain.
    #[must_use]
    pub fn into_user(self) -> Self {
        if matches!(self.kind, ErrorKind::User) {
            self
        } else {
            Self::new(ErrorKind::User)
                .with_context("callback raised")
                .with_source(self)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for engine operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::AllFailed);
        assert_eq!(err.to_string(), "all-failed");
    }

    #[test]
    fn display_with_context() {
        let err = Error::ownership("second consumer of D3");
        assert_eq!(err.to_string(), "ownership: second consumer of D3");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::user("outer").with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn cancelled_maps_interrupt_to_interrupted() {
        let plain = Error::cancelled(&CancelReason::new(CancelKind::RaceLost));
        assert_eq!(plain.kind(), ErrorKind::Cancelled);

        let interrupted = Error::cancelled(&CancelReason::interrupt());
        assert_eq!(interrupted.kind(), ErrorKind::Interrupted);
    }

    #[test]
    fn into_user_wraps_foreign_kinds() {
        let wrapped = Error::new(ErrorKind::Timeout).into_user();
        assert_eq!(wrapped.kind(), ErrorKind::User);
        assert!(wrapped.source().is_some());

        let passthrough = Error::user("bad").into_user();
        assert_eq!(passthrough.kind(), ErrorKind::User);
        assert_eq!(passthrough.to_string(), "user: bad");
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::Insufficient));
        let err = res.context("quorum check").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Insufficient);
        assert_eq!(err.to_string(), "insufficient: quorum check");
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Error::new(ErrorKind::Cancelled).is_cancelled());
        assert!(!Error::new(ErrorKind::Cancelled).is_timeout());
        assert!(Error::new(ErrorKind::Timeout).is_timeout());
    }
}
