//! The event loop.
//!
//! One loop drives one barrier. Each tick:
//!
//! 1. Drain the ready queue; every dequeued entry runs one child callback
//!    (or observer) to completion.
//! 2. Start any pending reachable producers the drain uncovered.
//! 3. If the ready queue refilled, keep draining.
//! 4. Otherwise block on the OS poller until the next timer deadline, a
//!    wakeup-channel post, or an interrupt.
//! 5. Dispatch whatever fired and go back to (1).
//!
//! The loop returns once the root is terminal and nothing is runnable;
//! teardown (cancelling stragglers, flushing observers) is the barrier's
//! job.

pub mod poller;
pub mod timer;
pub mod wait;

use std::num::NonZeroUsize;
use std::sync::Arc;

use polling::Events;

use crate::engine::ready::ReadyEntry;
use crate::engine::{self, cancel, SharedEngine};
use crate::error::{Error, Result};
use crate::source::Readiness;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, Value};

/// Runs the loop until the barrier root terminates.
pub(crate) fn run(shared: &SharedEngine) -> Result<()> {
    let capacity = {
        let state = shared.borrow();
        NonZeroUsize::new(state.config.events_capacity).unwrap_or(NonZeroUsize::MIN)
    };
    let mut events = Events::with_capacity(capacity);
    let mut interrupted = false;

    loop {
        drain_runnable(shared, &mut interrupted);

        if shared.borrow().finished() {
            trace!("root terminal, loop returning");
            return Ok(());
        }

        block_for_events(shared, &mut events)?;
    }
}

/// Steps 1–3: drains ready work until the engine is quiescent.
fn drain_runnable(shared: &SharedEngine, interrupted: &mut bool) {
    loop {
        // Settlements adapters produced synchronously on this thread.
        let settled: Vec<_> = {
            let mut state = shared.borrow_mut();
            state.settled.drain(..).collect()
        };
        if !settled.is_empty() {
            let mut state = shared.borrow_mut();
            for (node, outcome) in settled {
                state.apply_producer_settlement(node, outcome);
            }
            continue;
        }

        // One ready entry at a time; callbacks run with no engine borrow.
        let entry = shared.borrow_mut().ready.pop();
        if let Some(entry) = entry {
            match entry {
                ReadyEntry::Deliver {
                    target,
                    slot,
                    settlement,
                } => engine::process_delivery(shared, target, slot, settlement),
                ReadyEntry::Observe {
                    observer,
                    settlement,
                } => observer(&settlement),
            }
            continue;
        }

        // Lazy starts for producers that became reachable this tick.
        let to_start = {
            let mut state = shared.borrow_mut();
            std::mem::take(&mut state.to_start)
        };
        if !to_start.is_empty() {
            let mut state = shared.borrow_mut();
            for id in to_start {
                engine::start_node(&mut state, id);
            }
            continue;
        }

        // External interrupt: cancel the root once and let the cascade
        // drain through the normal machinery. Teardown-grade, so a shared
        // root still settles and the loop can terminate.
        if !*interrupted && interrupt_requested(shared) {
            *interrupted = true;
            let mut state = shared.borrow_mut();
            if let Some(root) = state.root {
                debug!("interrupt received, cancelling root");
                cancel::request_cancel(
                    &mut state,
                    vec![root],
                    CancelReason::interrupt(),
                    true,
                );
            }
            continue;
        }

        return;
    }
}

fn interrupt_requested(shared: &SharedEngine) -> bool {
    shared
        .borrow()
        .interrupt
        .as_ref()
        .is_some_and(|i| i.requested())
}

/// Steps 4–5: blocks until something fires, then dispatches it.
fn block_for_events(shared: &SharedEngine, events: &mut Events) -> Result<()> {
    let (wakeup, timeout) = {
        let mut state = shared.borrow_mut();
        state.refresh_now();
        let now = state.now;
        let deadline = state.timers.next_deadline();
        let mut timeout = deadline.map(|d| now.until(d));
        if let Some(cap) = state.config.poll_timeout_cap {
            timeout = Some(timeout.map_or(cap, |t| t.min(cap)));
        }
        (Arc::clone(&state.wakeup), timeout)
    };

    trace!(timeout = ?timeout, "blocking for events");
    wakeup
        .wait(events, timeout)
        .map_err(|e| Error::user("event wait failed").with_source(e))?;

    let mut state = shared.borrow_mut();
    state.refresh_now();

    // Cross-thread settlements from worker and watcher threads.
    let remote = state.wakeup.drain();
    for event in remote {
        let outcome = event.outcome.map(Value::from_sendable);
        state.apply_producer_settlement(event.node, outcome);
    }

    // Expired timers, in deadline order.
    let now = state.now;
    let expired = state.timers.pop_expired(now);
    for (token, node) in expired {
        engine::dispatch_readiness(&mut state, node, Readiness::Timer(token));
    }

    // I/O readiness (shape only; see the poller module docs).
    for event in events.iter() {
        let token = poller::IoToken(event.key as u64);
        if let Some((node, _interest)) = state.io.lookup(token) {
            engine::dispatch_readiness(
                &mut state,
                node,
                Readiness::Io {
                    token,
                    readable: event.readable,
                    writable: event.writable,
                },
            );
        }
    }

    Ok(())
}
