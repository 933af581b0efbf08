//! The deferred-value engine.
//!
//! [`EngineState`] is the per-barrier heart of the crate: the node slab,
//! the ready queue, reachability tracking, and every settlement path. The
//! driver owns the outer loop; everything that mutates the graph funnels
//! through here.
//!
//! # Borrow discipline
//!
//! The engine lives in a `Rc<RefCell<…>>` shared between the barrier frame
//! stack and the driver. User callbacks can re-enter the public API (they
//! construct deferreds, nest barriers, attach observers), so no engine
//! borrow may be held while user code runs. [`process_delivery`] is built
//! around that rule: decide under one borrow, run the callback with no
//! borrow, apply the outcome under a fresh borrow.

pub(crate) mod cancel;
pub(crate) mod ready;

use core::mem;
use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;

use crate::barrier::InterruptState;
use crate::combinator::race::AllFailed;
use crate::config::LoopConfig;
use crate::deferred::{Deferred, Step};
use crate::driver::poller::{IoRegistry, Wakeup};
use crate::driver::timer::TimerHeap;
use crate::driver::wait::WaitTable;
use crate::error::{Error, ErrorKind, Result};
use crate::node::{Node, NodeState, OnFinal, OnFulfil, OnReject, Role};
use crate::source::{Readiness, SettleQueue, SourceAdapter, SourceContext};
use crate::tracing_compat::trace;
use crate::types::{BarrierId, CancelReason, DeferredId, PanicPayload, Settlement, Time, Value};

use ready::ReadyQueue;

/// Shared handle to one barrier's engine.
pub(crate) type SharedEngine = Rc<RefCell<EngineState>>;

/// All state owned by one barrier: the node graph and the driver resources.
pub(crate) struct EngineState {
    pub barrier: BarrierId,
    pub config: LoopConfig,
    pub nodes: crate::util::Slab<Node>,
    pub root: Option<DeferredId>,
    pub ready: ReadyQueue,
    /// Settlements produced synchronously by adapters on the loop thread.
    pub settled: SettleQueue,
    /// Newly reachable producer nodes awaiting their lazy start.
    pub to_start: Vec<DeferredId>,
    pub timers: TimerHeap,
    pub io: IoRegistry,
    pub waits: WaitTable,
    pub wakeup: Arc<Wakeup>,
    pub interrupt: Option<Arc<InterruptState>>,
    pub started_at: Instant,
    pub now: Time,
}

impl EngineState {
    /// Creates a fresh engine for one barrier.
    pub(crate) fn new(config: LoopConfig) -> Result<Self> {
        let wakeup = Wakeup::new()
            .map_err(|e| Error::user("event loop initialisation failed").with_source(e))?;
        Ok(Self {
            barrier: BarrierId::next(),
            config,
            nodes: crate::util::Slab::new(),
            root: None,
            ready: ReadyQueue::default(),
            settled: SettleQueue::new(),
            to_start: Vec::new(),
            timers: TimerHeap::new(),
            io: IoRegistry::default(),
            waits: WaitTable::default(),
            wakeup,
            interrupt: None,
            started_at: Instant::now(),
            now: Time::ZERO,
        })
    }

    /// Refreshes the loop clock from the wall clock.
    pub(crate) fn refresh_now(&mut self) {
        let elapsed = self.started_at.elapsed();
        self.now = Time::from_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Verifies a handle belongs to this barrier and resolves its node ID.
    pub(crate) fn check_handle(&self, handle: Deferred) -> Result<DeferredId> {
        if handle.barrier != self.barrier {
            return Err(Error::cross_barrier(format!(
                "deferred of {} used inside {}",
                handle.barrier, self.barrier
            )));
        }
        if !self.nodes.contains(handle.node.slot()) {
            return Err(Error::cross_barrier(format!(
                "unknown deferred {}",
                handle.node
            )));
        }
        Ok(handle.node)
    }

    /// Inserts a source node backed by a producer.
    pub(crate) fn insert_source(&mut self, producer: Box<dyn SourceAdapter>) -> DeferredId {
        DeferredId::from_slot(self.nodes.insert(Node::source(producer)))
    }

    /// Inserts a combinator node with the given role.
    pub(crate) fn insert_combinator(&mut self, role: Role) -> DeferredId {
        DeferredId::from_slot(self.nodes.insert(Node::combinator(role)))
    }

    fn node(&self, id: DeferredId) -> Option<&Node> {
        self.nodes.get(id.slot())
    }

    fn node_mut(&mut self, id: DeferredId) -> Option<&mut Node> {
        self.nodes.get_mut(id.slot())
    }

    /// Validates the single-consumer discipline for a whole parent list
    /// before any edge is created, so a violation leaves the graph intact.
    ///
    /// Duplicate occurrences of the same non-shared parent in one call are
    /// a violation too.
    pub(crate) fn precheck_adoption(&self, parents: &[DeferredId]) -> Result<()> {
        let mut occurrences: Vec<(DeferredId, usize)> = Vec::new();
        for &id in parents {
            match occurrences.iter_mut().find(|(seen, _)| *seen == id) {
                Some((_, count)) => *count += 1,
                None => occurrences.push((id, 1)),
            }
        }
        for (id, count) in occurrences {
            let node = self
                .node(id)
                .ok_or_else(|| Error::cross_barrier(format!("unknown deferred {id}")))?;
            if !node.shared && (count > 1 || !node.children.is_empty()) {
                return Err(Error::ownership(format!(
                    "second consumer of non-shared deferred {id}"
                )));
            }
        }
        Ok(())
    }

    /// Links `child` as a consumer of `parent`. Returns the parent slot.
    ///
    /// If the parent is already settled, the delivery is enqueued
    /// immediately; if the child is reachable, reachability (and lazy
    /// starting) propagates to the parent's subgraph.
    pub(crate) fn adopt(&mut self, parent: DeferredId, child: DeferredId) -> Result<usize> {
        {
            let p = self
                .node(parent)
                .ok_or_else(|| Error::cross_barrier(format!("unknown deferred {parent}")))?;
            p.check_adoptable(parent)?;
        }

        let slot = {
            let c = self.node_mut(child).expect("child node just inserted");
            c.parents.push(parent);
            c.parents.len() - 1
        };
        self.node_mut(parent)
            .expect("parent checked above")
            .children
            .push(child);

        let parent_settlement = self.node(parent).and_then(|p| p.settlement.clone());
        if let Some(settlement) = parent_settlement {
            self.ready.push_delivery(child, slot, settlement);
        }

        let child_reachable = self.node(child).is_some_and(|c| c.reachable);
        if child_reachable {
            self.mark_reachable_from(parent);
        }
        Ok(slot)
    }

    /// Marks `start` and its ancestors reachable, queueing lazy starts for
    /// pending producers found along the way. Iterative; chain depth never
    /// grows the stack.
    pub(crate) fn mark_reachable_from(&mut self, start: DeferredId) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node_mut(id) else { continue };
            if node.reachable {
                continue;
            }
            node.reachable = true;
            // A settled node's parents can no longer affect it; stopping
            // here keeps early-settled joins from starting dead branches.
            if node.is_terminal() {
                continue;
            }
            let wants_start = node.producer.is_some()
                && !node.started
                && matches!(node.state, NodeState::Pending);
            let parents: SmallVec<[DeferredId; 2]> = node.parents.clone();
            if wants_start {
                self.to_start.push(id);
            }
            stack.extend(parents);
        }
    }

    /// Binds the barrier root and makes its subgraph reachable.
    pub(crate) fn set_root(&mut self, root: DeferredId) {
        self.root = Some(root);
        self.mark_reachable_from(root);
    }

    /// Returns a node's recorded settlement, if it has one.
    pub(crate) fn settlement_of(&self, id: DeferredId) -> Option<Settlement> {
        self.node(id).and_then(|n| n.settlement.clone())
    }

    /// Returns a node's current state.
    pub(crate) fn node_state(&self, id: DeferredId) -> Option<NodeState> {
        self.node(id).map(|n| n.state)
    }

    /// Flags a node as shared (multi-consumer, teardown-only cancellation).
    pub(crate) fn mark_shared(&mut self, id: DeferredId) {
        if let Some(node) = self.node_mut(id) {
            node.shared = true;
        }
    }

    /// Attaches a non-owning observer. Terminal nodes notify immediately
    /// through the ready queue.
    pub(crate) fn observe(&mut self, id: DeferredId, observer: crate::node::Observer) {
        let settlement = match self.node_mut(id) {
            Some(node) => {
                if let Some(settlement) = node.settlement.clone() {
                    settlement
                } else {
                    node.observers.push(observer);
                    return;
                }
            }
            None => return,
        };
        self.ready.push_observer(observer, settlement);
    }

    /// Returns true once the root is terminal and nothing is runnable.
    pub(crate) fn finished(&self) -> bool {
        let Some(root) = self.root else { return false };
        let root_terminal = self.node(root).map_or(true, Node::is_terminal);
        root_terminal && self.ready.is_empty() && self.settled.is_empty()
    }

    /// Settles a node. The first terminal transition wins; anything after
    /// it — late producer events, duplicate deliveries — is discarded.
    pub(crate) fn settle(&mut self, id: DeferredId, settlement: Settlement) {
        let Some(node) = self.node_mut(id) else { return };
        if node.is_terminal() {
            trace!(node = %id, "late settlement discarded");
            return;
        }

        node.state = match &settlement {
            Settlement::Fulfilled(_) => NodeState::Fulfilled,
            Settlement::Rejected(_) => NodeState::Rejected,
            Settlement::Cancelled(_) => NodeState::Cancelled,
        };
        node.settlement = Some(settlement.clone());
        node.producer = None;
        let observers = mem::take(&mut node.observers);
        let children: SmallVec<[DeferredId; 1]> = node.children.clone();
        trace!(node = %id, state = %node.state, "node settled");

        self.release_registrations(id);

        for observer in observers {
            self.ready.push_observer(observer, settlement.clone());
        }
        for child in children {
            let slots: SmallVec<[usize; 2]> = self
                .node(child)
                .map(|c| {
                    c.parents
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| **p == id)
                        .map(|(i, _)| i)
                        .collect()
                })
                .unwrap_or_default();
            for slot in slots {
                self.ready.push_delivery(child, slot, settlement.clone());
            }
        }
    }

    /// Applies a settlement coming from a producer (local or remote path).
    pub(crate) fn apply_producer_settlement(
        &mut self,
        id: DeferredId,
        outcome: core::result::Result<Value, Error>,
    ) {
        match outcome {
            Ok(value) => self.settle(id, Settlement::Fulfilled(value)),
            Err(error) => self.settle(id, Settlement::Rejected(error)),
        }
    }

    /// Releases every driver registration a node holds.
    fn release_registrations(&mut self, id: DeferredId) {
        let regs = match self.node_mut(id) {
            Some(node) => mem::take(&mut node.regs),
            None => return,
        };
        if regs.is_empty() {
            return;
        }
        for token in regs.timers {
            self.timers.cancel(token);
        }
        for token in regs.io {
            self.io.cancel(token);
        }
        for token in regs.waits {
            self.waits.cancel(token);
        }
    }
}

impl core::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineState")
            .field("barrier", &self.barrier)
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .finish()
    }
}

/// Starts a pending producer node.
///
/// A shared node may carry a recorded cancel request from a settled join
/// and still start here: the request only takes effect at teardown, and
/// its surviving consumers are owed the result until then.
pub(crate) fn start_node(state: &mut EngineState, id: DeferredId) {
    let Some(node) = state.node_mut(id) else { return };
    if node.started || !matches!(node.state, NodeState::Pending) {
        return;
    }
    let Some(mut producer) = node.producer.take() else {
        return;
    };
    node.started = true;
    node.state = NodeState::Running;
    trace!(node = %id, "starting producer");

    let mut regs = crate::node::Registrations::default();
    {
        let EngineState {
            settled,
            timers,
            io,
            waits,
            wakeup,
            now,
            ..
        } = state;
        let mut cx = SourceContext {
            node: id,
            now: *now,
            settled,
            timers,
            io,
            waits,
            wakeup,
            regs: &mut regs,
        };
        producer.start(&mut cx);
    }

    if let Some(node) = state.node_mut(id) {
        node.regs.merge(regs);
        node.producer = Some(producer);
    }
}

/// Forwards a readiness event to the adapter that registered it.
pub(crate) fn dispatch_readiness(state: &mut EngineState, id: DeferredId, event: Readiness) {
    let Some(node) = state.node_mut(id) else { return };
    if node.is_terminal() {
        return;
    }
    let Some(mut producer) = node.producer.take() else {
        return;
    };

    let mut regs = crate::node::Registrations::default();
    {
        let EngineState {
            settled,
            timers,
            io,
            waits,
            wakeup,
            now,
            ..
        } = state;
        let mut cx = SourceContext {
            node: id,
            now: *now,
            settled,
            timers,
            io,
            waits,
            wakeup,
            regs: &mut regs,
        };
        producer.on_ready(event, &mut cx);
    }

    if let Some(node) = state.node_mut(id) {
        node.regs.merge(regs);
        node.producer = Some(producer);
    }
}

/// How a delivered parent settlement should be consumed.
enum Decision {
    Nothing,
    Settle(Settlement),
    SettleAndCancelRest {
        settlement: Settlement,
        reason: CancelReason,
    },
    Run(RunKind),
}

enum RunKind {
    Fulfil(OnFulfil, Value),
    Reject(OnReject, Error),
    Final(OnFinal, Settlement),
}

/// Converts a parent settlement into what a sequential child adopts:
/// cancellation presents downstream as a `cancelled`-kind rejection.
fn reframe(settlement: Settlement) -> Settlement {
    match settlement {
        Settlement::Cancelled(reason) => Settlement::Rejected(Error::cancelled(&reason)),
        other => other,
    }
}

/// Processes one `(deferred, settlement)` ready-queue entry.
pub(crate) fn process_delivery(
    shared: &SharedEngine,
    target: DeferredId,
    slot: usize,
    settlement: Settlement,
) {
    let decision = {
        let mut state = shared.borrow_mut();
        decide(&mut state, target, slot, settlement)
    };

    match decision {
        Decision::Nothing => {}
        Decision::Settle(settlement) => {
            shared.borrow_mut().settle(target, settlement);
        }
        Decision::SettleAndCancelRest { settlement, reason } => {
            let mut state = shared.borrow_mut();
            state.settle(target, settlement);
            let parents: Vec<DeferredId> = state
                .node(target)
                .map(|n| n.parents.iter().copied().collect())
                .unwrap_or_default();
            let seeds: Vec<DeferredId> = parents
                .into_iter()
                .filter(|p| state.node(*p).is_some_and(|n| !n.is_terminal()))
                .collect();
            cancel::request_cancel(&mut state, seeds, reason, false);
        }
        Decision::Run(run) => {
            let (outcome, finally_outcome) = match run {
                RunKind::Fulfil(cb, value) => (invoke(move || cb(value)), None),
                RunKind::Reject(cb, error) => (invoke(move || cb(error)), None),
                RunKind::Final(cb, parent) => (invoke(cb), Some(parent)),
            };
            apply_callback_outcome(shared, target, outcome, finally_outcome);
        }
    }
}

/// Runs a user callback with panic capture. No engine borrow is held.
fn invoke<F: FnOnce() -> Result<Step>>(f: F) -> Result<Step> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::user("callback panicked")
            .with_source(PanicPayload::from_unwind(payload.as_ref()))),
    }
}

fn apply_callback_outcome(
    shared: &SharedEngine,
    target: DeferredId,
    outcome: Result<Step>,
    finally_outcome: Option<Settlement>,
) {
    let mut state = shared.borrow_mut();
    match outcome {
        Err(error) => state.settle(target, Settlement::Rejected(error.into_user())),
        Ok(Step::Value(value)) => match finally_outcome {
            // `finally` discards the callback value; the parent outcome
            // stands.
            Some(parent) => state.settle(target, reframe(parent)),
            None => state.settle(target, Settlement::Fulfilled(value)),
        },
        Ok(Step::Absorb(handle)) => {
            if let Some(node) = state.node_mut(target) {
                node.role = match finally_outcome {
                    Some(parent) => Role::FinallyAbsorb {
                        outcome: Some(parent),
                    },
                    None => Role::Absorb,
                };
            }
            absorb(&mut state, target, handle);
        }
    }
}

/// Adopts a callback-returned deferred as the new parent of `child`.
fn absorb(state: &mut EngineState, child: DeferredId, handle: Deferred) {
    if handle.barrier != state.barrier {
        state.settle(
            child,
            Settlement::Rejected(Error::cross_barrier(
                "absorbed deferred belongs to another barrier",
            )),
        );
        return;
    }
    let adopted = handle.node;
    if !state.nodes.contains(adopted.slot()) {
        state.settle(
            child,
            Settlement::Rejected(Error::cross_barrier(format!(
                "unknown deferred {adopted}"
            ))),
        );
        return;
    }

    // Adopting an ancestor would make the child wait on itself.
    let mut stack = vec![adopted];
    let mut seen: HashSet<DeferredId> = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == child {
            state.settle(
                child,
                Settlement::Rejected(Error::ownership("absorption cycle")),
            );
            return;
        }
        if seen.insert(id) {
            if let Some(node) = state.node(id) {
                stack.extend(node.parents.iter().copied());
            }
        }
    }

    if let Err(error) = state.adopt(adopted, child) {
        state.settle(child, Settlement::Rejected(error));
    }
}

#[allow(clippy::too_many_lines)]
fn decide(
    state: &mut EngineState,
    target: DeferredId,
    slot: usize,
    settlement: Settlement,
) -> Decision {
    let Some(node) = state.node_mut(target) else {
        return Decision::Nothing;
    };
    if node.is_terminal() {
        return Decision::Nothing;
    }

    match &mut node.role {
        Role::Source => Decision::Nothing,

        Role::Then { on_fulfil } => match settlement {
            Settlement::Fulfilled(value) => {
                let Some(cb) = on_fulfil.take() else {
                    return Decision::Nothing;
                };
                node.state = NodeState::Running;
                Decision::Run(RunKind::Fulfil(cb, value))
            }
            // Rejections pass through unmodified.
            other => Decision::Settle(reframe(other)),
        },

        Role::Catch { on_reject, kinds } => match settlement {
            Settlement::Fulfilled(value) => Decision::Settle(Settlement::Fulfilled(value)),
            other => {
                let error = other.as_error().expect("settlement has an error face");
                let handled = kinds
                    .as_ref()
                    .map_or(true, |filter| filter.contains(&error.kind()));
                if handled {
                    let Some(cb) = on_reject.take() else {
                        return Decision::Nothing;
                    };
                    node.state = NodeState::Running;
                    Decision::Run(RunKind::Reject(cb, error))
                } else {
                    Decision::Settle(Settlement::Rejected(error))
                }
            }
        },

        Role::Finally { on_final } => {
            let Some(cb) = on_final.take() else {
                return Decision::Nothing;
            };
            node.state = NodeState::Running;
            Decision::Run(RunKind::Final(cb, settlement))
        }

        Role::Absorb => Decision::Settle(reframe(settlement)),

        Role::FinallyAbsorb { outcome } => match settlement {
            Settlement::Fulfilled(_) => {
                let parent = outcome.take().expect("finally outcome stored once");
                Decision::Settle(reframe(parent))
            }
            other => {
                let error = other.as_error().expect("settlement has an error face");
                Decision::Settle(Settlement::Rejected(error))
            }
        },

        Role::All { results, pending } => match settlement {
            Settlement::Fulfilled(value) => {
                if slot >= results.len() || results[slot].is_some() {
                    return Decision::Nothing;
                }
                results[slot] = Some(value);
                *pending -= 1;
                if *pending == 0 {
                    let collected: Vec<Value> = results
                        .iter_mut()
                        .map(|r| r.take().expect("every slot filled"))
                        .collect();
                    Decision::Settle(Settlement::Fulfilled(Value::new(collected)))
                } else {
                    Decision::Nothing
                }
            }
            other => {
                let error = other.as_error().expect("settlement has an error face");
                Decision::SettleAndCancelRest {
                    settlement: Settlement::Rejected(error),
                    reason: CancelReason::sibling_failed(),
                }
            }
        },

        Role::Any { errors, pending } => match settlement {
            Settlement::Fulfilled(value) => Decision::SettleAndCancelRest {
                settlement: Settlement::Fulfilled(value),
                reason: CancelReason::race_lost(),
            },
            other => {
                let error = other.as_error().expect("settlement has an error face");
                if slot >= errors.len() || errors[slot].is_some() {
                    return Decision::Nothing;
                }
                errors[slot] = Some(error);
                *pending -= 1;
                if *pending == 0 {
                    let causes: Vec<Error> = errors
                        .iter_mut()
                        .map(|e| e.take().expect("every error recorded"))
                        .collect();
                    let aggregate = Error::new(ErrorKind::AllFailed)
                        .with_context("every branch rejected")
                        .with_source(AllFailed::new(causes));
                    Decision::Settle(Settlement::Rejected(aggregate))
                } else {
                    Decision::Nothing
                }
            }
        },

        Role::Quorum {
            need,
            results,
            pending,
        } => match settlement {
            Settlement::Fulfilled(value) => {
                results.push(value);
                *pending -= 1;
                if results.len() >= *need {
                    let collected = mem::take(results);
                    Decision::SettleAndCancelRest {
                        settlement: Settlement::Fulfilled(Value::new(collected)),
                        reason: CancelReason::quorum_closed(),
                    }
                } else {
                    Decision::Nothing
                }
            }
            _ => {
                *pending -= 1;
                if results.len() + *pending < *need {
                    let needed = *need;
                    let possible = results.len() + *pending;
                    Decision::SettleAndCancelRest {
                        settlement: Settlement::Rejected(
                            Error::new(ErrorKind::Insufficient).with_context(format!(
                                "needed {needed} fulfilments, at most {possible} still possible"
                            )),
                        ),
                        reason: CancelReason::quorum_closed(),
                    }
                } else {
                    Decision::Nothing
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reframe_converts_cancellation_to_error() {
        let reframed = reframe(Settlement::Cancelled(CancelReason::race_lost()));
        match reframed {
            Settlement::Rejected(e) => assert_eq!(e.kind(), ErrorKind::Cancelled),
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn reframe_leaves_other_settlements_alone() {
        assert!(reframe(Settlement::Fulfilled(Value::unit())).is_fulfilled());
        assert!(reframe(Settlement::Rejected(Error::user("x"))).is_rejected());
    }

    #[test]
    fn invoke_captures_panics_as_user_errors() {
        let outcome = invoke(|| panic!("boom"));
        let err = outcome.expect_err("panic becomes rejection");
        assert_eq!(err.kind(), ErrorKind::User);
    }
}
