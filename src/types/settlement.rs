//! Terminal settlement of a deferred node.
//!
//! A node settles exactly once, into one of three terminal outcomes:
//! `Fulfilled(value)`, `Rejected(error)`, or `Cancelled(reason)`.
//! Cancellation presents to downstream consumers as a rejection of kind
//! `cancelled`, but the node record keeps the distinction.

use core::fmt;

use super::cancel::CancelReason;
use super::value::Value;
use crate::error::Error;

/// Payload from a caught callback panic.
///
/// Wraps the panic value for transport through the rejection path.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from the opaque payload `std::panic::catch_unwind`
    /// returns, falling back to a placeholder for non-string payloads.
    #[must_use]
    pub fn from_unwind(payload: &(dyn core::any::Any + Send)) -> Self {
        if let Some(s) = payload.downcast_ref::<&str>() {
            Self::new(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self::new(s.clone())
        } else {
            Self::new("opaque panic payload")
        }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicPayload {}

/// The terminal outcome of one deferred node.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The producer or callback chain delivered a value.
    Fulfilled(Value),
    /// The producer or callback chain delivered an error.
    Rejected(Error),
    /// The result stopped being needed before the node settled.
    Cancelled(CancelReason),
}

impl Settlement {
    /// Returns true if this settlement is a fulfilment.
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// Returns true if this settlement is a rejection.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns true if this settlement is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the fulfilment value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Fulfilled(v) => Some(v),
            _ => None,
        }
    }

    /// Views this settlement as the error a downstream consumer sees.
    ///
    /// Fulfilments have no error face; cancellations surface as a
    /// `cancelled`-kind error carrying the reason.
    #[must_use]
    pub fn as_error(&self) -> Option<Error> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(e) => Some(e.clone()),
            Self::Cancelled(reason) => Some(Error::cancelled(reason)),
        }
    }
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfilled(_) => write!(f, "fulfilled"),
            Self::Rejected(e) => write!(f, "rejected: {e}"),
            Self::Cancelled(r) => write!(f, "cancelled: {r}"),
        }
    }
}
