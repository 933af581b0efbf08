//! The public deferred-value handle.
//!
//! A [`Deferred`] is a cheap copyable handle into its barrier's node slab.
//! All combination happens through it; ownership and cross-barrier
//! discipline are enforced by the engine on every call, so a handle that
//! escaped its barrier fails loudly instead of corrupting another graph.

use core::any::Any;
use core::fmt;

use crate::barrier::with_engine;
use crate::combinator::{self, sequence};
use crate::error::{Error, ErrorKind, Result};
use crate::node::NodeState;
use crate::types::{BarrierId, DeferredId, Settlement, Value};

/// Handle to one deferred value inside an active barrier.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Deferred {
    pub(crate) barrier: BarrierId,
    pub(crate) node: DeferredId,
}

impl Deferred {
    pub(crate) fn new(barrier: BarrierId, node: DeferredId) -> Self {
        Self { barrier, node }
    }

    /// Chains a fulfilment callback; see [`crate::combinator`].
    ///
    /// The callback may return [`Step::of`] a plain value, or
    /// [`Step::absorb`] another deferred whose outcome the child adopts.
    /// A parent rejection passes through unmodified.
    pub fn then<F>(self, on_fulfil: F) -> Result<Self>
    where
        F: FnOnce(Value) -> Result<Step> + 'static,
    {
        sequence::then(self, on_fulfil)
    }

    /// Chains a rejection callback handling every error kind.
    ///
    /// A fulfilled parent passes through unchanged.
    pub fn catch<F>(self, on_reject: F) -> Result<Self>
    where
        F: FnOnce(Error) -> Result<Step> + 'static,
    {
        sequence::catch(self, None, on_reject)
    }

    /// Chains a rejection callback handling only the given kinds; other
    /// errors pass through untouched.
    pub fn catch_kinds<F>(self, kinds: &[ErrorKind], on_reject: F) -> Result<Self>
    where
        F: FnOnce(Error) -> Result<Step> + 'static,
    {
        sequence::catch(self, Some(kinds.to_vec()), on_reject)
    }

    /// Runs a callback after the parent settles, whatever the outcome.
    ///
    /// The child adopts the parent's outcome unless the callback errors or
    /// returns a deferred that rejects, in which case that outcome replaces
    /// it.
    pub fn finally<F>(self, on_final: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Step> + 'static,
    {
        sequence::finally(self, on_final)
    }

    /// Opts this deferred into multi-consumer sharing.
    ///
    /// A shared deferred may be adopted by any number of children,
    /// multicasts its single outcome to all of them, and is only cancelled
    /// at barrier teardown.
    pub fn share(self) -> Result<Self> {
        combinator::share::share(self)
    }

    /// Attaches a non-owning observer invoked with this node's settlement,
    /// including cancellation. Observers do not count as consumers.
    pub fn watch<F>(self, observer: F) -> Result<()>
    where
        F: FnOnce(&Settlement) + 'static,
    {
        with_engine(|state| {
            let id = state.check_handle(self)?;
            state.observe(id, Box::new(observer));
            Ok(())
        })
    }

    /// Returns this node's current lifecycle state (diagnostics).
    pub fn state(self) -> Result<NodeState> {
        with_engine(|state| {
            let id = state.check_handle(self)?;
            state
                .node_state(id)
                .ok_or_else(|| Error::cross_barrier(format!("unknown deferred {id}")))
        })
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred({}/{})", self.barrier, self.node)
    }
}

/// What a callback hands back to the engine.
pub enum Step {
    /// An immediate value; the child fulfils with it.
    Value(Value),
    /// Another deferred; the child adopts its outcome ("absorption").
    Absorb(Deferred),
}

impl Step {
    /// Wraps a plain value.
    #[must_use]
    pub fn of<T: Any>(value: T) -> Self {
        Self::Value(Value::new(value))
    }

    /// Wraps an already-built [`Value`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self::Value(value)
    }

    /// Continues with another deferred's outcome.
    #[must_use]
    pub fn absorb(deferred: Deferred) -> Self {
        Self::Absorb(deferred)
    }
}

impl From<Deferred> for Step {
    fn from(deferred: Deferred) -> Self {
        Self::Absorb(deferred)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => write!(f, "Step::Value"),
            Self::Absorb(d) => write!(f, "Step::Absorb({d:?})"),
        }
    }
}
