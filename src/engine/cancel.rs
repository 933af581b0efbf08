//! The cancellation walk.
//!
//! Cancellation propagates upward, against the data flow: starting from a
//! set of nodes whose results are no longer needed, the walk visits their
//! exclusive parents transitively. Each visited node records the request,
//! aborts its producer (if running), settles `Cancelled`, and hands the
//! settlement to the normal delivery machinery so observers and any
//! remaining consumers see it.
//!
//! Shared nodes are the exception: other consumers may still need their
//! result, so a request only *records* on them — strengthened against any
//! reason already recorded — and the teardown sweep settles them with the
//! strongest reason they accumulated. A shared node hit first by a race
//! loss and then by an interrupt reports the interrupt, not the race.

use crate::engine::EngineState;
use crate::node::NodeState;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, DeferredId, Settlement};

/// Walks the graph upward from `seeds`, cancelling everything whose result
/// is no longer needed.
///
/// `teardown` lifts the shared-node exemption; the barrier uses it when it
/// closes.
pub(crate) fn request_cancel(
    state: &mut EngineState,
    seeds: Vec<DeferredId>,
    reason: CancelReason,
    teardown: bool,
) {
    let mut stack = seeds;
    while let Some(id) = stack.pop() {
        let Some(node) = state.node_mut(id) else {
            continue;
        };
        if node.is_terminal() {
            continue;
        }

        // Record the request, keeping the strongest reason when several
        // causes hit the same node.
        match &mut node.cancel_reason {
            Some(existing) => {
                existing.strengthen(&reason);
            }
            vacant => *vacant = Some(reason.clone()),
        }

        // A shared node stays alive for its other consumers until the
        // barrier itself closes; the recorded reason waits for teardown.
        if node.shared && !teardown {
            continue;
        }

        let settle_reason = node
            .cancel_reason
            .clone()
            .unwrap_or_else(|| reason.clone());
        let was_running = matches!(node.state, NodeState::Running) && node.started;
        let producer = node.producer.take();
        let parents: Vec<DeferredId> = node.parents.iter().copied().collect();

        if let Some(mut producer) = producer {
            if was_running {
                producer.abort();
            }
            drop(producer);
        }

        debug!(node = %id, reason = %settle_reason, "cancelling");
        state.settle(id, Settlement::Cancelled(settle_reason));

        for parent in parents {
            if is_exclusive_parent(state, parent, id) {
                stack.push(parent);
            }
        }
    }
}

/// Cancels every non-terminal node in the barrier (teardown sweep).
pub(crate) fn cancel_all(state: &mut EngineState, reason: CancelReason) {
    let seeds: Vec<DeferredId> = state
        .nodes
        .ids()
        .into_iter()
        .map(DeferredId::from_slot)
        .filter(|id| state.node(*id).is_some_and(|n| !n.is_terminal()))
        .collect();
    if !seeds.is_empty() {
        debug!(count = seeds.len(), "teardown cancellation sweep");
    }
    request_cancel(state, seeds, reason, true);
}

/// A parent is exclusive to `child` when it is not shared and `child` is
/// its only consumer.
fn is_exclusive_parent(state: &EngineState, parent: DeferredId, child: DeferredId) -> bool {
    state.node(parent).is_some_and(|p| {
        !p.shared && p.children.len() == 1 && p.children[0] == child && !p.is_terminal()
    })
}
