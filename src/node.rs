//! The deferred-node record.
//!
//! One [`Node`] tracks the full lifecycle of a single deferred value: its
//! state machine, the producer that settles it (for source nodes), the role
//! that tells the engine how to consume parent settlements (for combinator
//! nodes), the DAG edges, and the driver registrations to release when the
//! node reaches a terminal state.

use core::fmt;
use smallvec::SmallVec;

use crate::deferred::Step;
use crate::driver::poller::IoToken;
use crate::driver::timer::TimerToken;
use crate::driver::wait::WaitToken;
use crate::error::{Error, ErrorKind, Result};
use crate::source::SourceAdapter;
use crate::types::{CancelReason, DeferredId, Settlement, Value};

/// Callback run when the parent fulfils.
pub(crate) type OnFulfil = Box<dyn FnOnce(Value) -> Result<Step>>;
/// Callback run when the parent rejects.
pub(crate) type OnReject = Box<dyn FnOnce(Error) -> Result<Step>>;
/// Callback run when the parent settles, regardless of outcome.
pub(crate) type OnFinal = Box<dyn FnOnce() -> Result<Step>>;
/// Non-owning settlement observer.
pub(crate) type Observer = Box<dyn FnOnce(&Settlement)>;

/// The state of a deferred node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Created; producer not yet started, no parent settlement consumed.
    Pending,
    /// Producer started, or a callback is being applied.
    Running,
    /// Terminal: settled with a value.
    Fulfilled,
    /// Terminal: settled with an error.
    Rejected,
    /// Terminal: the result stopped being needed.
    Cancelled,
}

impl NodeState {
    /// Returns true for the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// How a node settles: by its own producer, or by consuming its parents.
pub(crate) enum Role {
    /// Settled by a source adapter.
    Source,
    /// Sequential child of one parent; runs a fulfilment callback.
    Then { on_fulfil: Option<OnFulfil> },
    /// Sequential child of one parent; runs a rejection callback,
    /// optionally filtered to a set of error kinds.
    Catch {
        on_reject: Option<OnReject>,
        kinds: Option<Vec<ErrorKind>>,
    },
    /// Sequential child of one parent; runs on any settlement.
    Finally { on_final: Option<OnFinal> },
    /// Adopting the outcome of a deferred returned by a callback.
    Absorb,
    /// A `finally` callback returned a deferred; the stored parent outcome
    /// stands unless that deferred rejects.
    FinallyAbsorb { outcome: Option<Settlement> },
    /// Fulfils with every parent result in input order.
    All {
        results: Vec<Option<Value>>,
        pending: usize,
    },
    /// Fulfils with the first parent result.
    Any {
        errors: Vec<Option<Error>>,
        pending: usize,
    },
    /// Fulfils with the first `need` parent results in settlement order.
    Quorum {
        need: usize,
        results: Vec<Value>,
        pending: usize,
    },
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Source => "Source",
            Self::Then { .. } => "Then",
            Self::Catch { .. } => "Catch",
            Self::Finally { .. } => "Finally",
            Self::Absorb => "Absorb",
            Self::FinallyAbsorb { .. } => "FinallyAbsorb",
            Self::All { .. } => "All",
            Self::Any { .. } => "Any",
            Self::Quorum { .. } => "Quorum",
        };
        f.write_str(name)
    }
}

/// Driver registrations owned by one node, released on terminal transition.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    pub timers: SmallVec<[TimerToken; 1]>,
    pub io: SmallVec<[IoToken; 1]>,
    pub waits: SmallVec<[WaitToken; 1]>,
}

impl Registrations {
    pub(crate) fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.io.is_empty() && self.waits.is_empty()
    }

    pub(crate) fn merge(&mut self, mut other: Self) {
        self.timers.append(&mut other.timers);
        self.io.append(&mut other.io);
        self.waits.append(&mut other.waits);
    }
}

/// One deferred-value record in a barrier's slab.
pub(crate) struct Node {
    pub state: NodeState,
    pub settlement: Option<Settlement>,
    pub producer: Option<Box<dyn SourceAdapter>>,
    pub role: Role,
    /// Ordered parents this node consumes from.
    pub parents: SmallVec<[DeferredId; 2]>,
    /// Owning children; more than one only when `shared`.
    pub children: SmallVec<[DeferredId; 1]>,
    pub shared: bool,
    /// The cancel-requested flag, carrying the strongest reason recorded
    /// so far. On a shared node several requests can accumulate here
    /// before the teardown sweep settles it.
    pub cancel_reason: Option<CancelReason>,
    pub reachable: bool,
    pub started: bool,
    pub regs: Registrations,
    pub observers: Vec<Observer>,
}

impl Node {
    /// Creates a source node backed by a producer.
    pub(crate) fn source(producer: Box<dyn SourceAdapter>) -> Self {
        Self::with_role(Role::Source, Some(producer))
    }

    /// Creates a combinator node with the given role.
    pub(crate) fn combinator(role: Role) -> Self {
        Self::with_role(role, None)
    }

    fn with_role(role: Role, producer: Option<Box<dyn SourceAdapter>>) -> Self {
        Self {
            state: NodeState::Pending,
            settlement: None,
            producer,
            role,
            parents: SmallVec::new(),
            children: SmallVec::new(),
            shared: false,
            cancel_reason: None,
            reachable: false,
            started: false,
            regs: Registrations::default(),
            observers: Vec::new(),
        }
    }

    /// Returns true if the node is in a terminal state.
    #[must_use]
    pub(crate) fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Checks the single-consumer discipline before attaching a child.
    pub(crate) fn check_adoptable(&self, id: DeferredId) -> Result<()> {
        if !self.shared && !self.children.is_empty() {
            return Err(Error::ownership(format!(
                "second consumer of non-shared deferred {id}"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("parents", &self.parents.len())
            .field("children", &self.children.len())
            .field("shared", &self.shared)
            .field("reachable", &self.reachable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!NodeState::Pending.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(NodeState::Fulfilled.is_terminal());
        assert!(NodeState::Rejected.is_terminal());
        assert!(NodeState::Cancelled.is_terminal());
    }

    #[test]
    fn non_shared_node_rejects_second_child() {
        let mut node = Node::combinator(Role::Absorb);
        let child = DeferredId::new_for_test(1);
        assert!(node.check_adoptable(child).is_ok());
        node.children.push(child);

        let second = node.check_adoptable(DeferredId::new_for_test(2));
        assert!(matches!(
            second.map_err(|e| e.kind()),
            Err(ErrorKind::Ownership)
        ));
    }

    #[test]
    fn shared_node_accepts_many_children() {
        let mut node = Node::combinator(Role::Source);
        node.shared = true;
        node.children.push(DeferredId::new_for_test(1));
        assert!(node.check_adoptable(DeferredId::new_for_test(2)).is_ok());
    }
}
