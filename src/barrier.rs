//! Synchronisation barriers.
//!
//! A barrier is the scope that owns an event loop and every deferred
//! created while it is active. [`synchronise`] pushes a frame onto the
//! per-thread barrier stack, evaluates the construction expression, drives
//! the loop until the root terminates, then tears the whole graph down:
//! every non-terminal deferred — shared ones included — is cancelled and
//! its adapter registrations released before control returns.
//!
//! Barriers nest by ordinary call-stack suspension: a callback that calls
//! [`synchronise`] parks the outer loop until the inner one returns. A
//! deferred constructed under one barrier fails every operation under
//! another with a `cross-barrier` error.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::LoopConfig;
use crate::deferred::Deferred;
use crate::driver::{self, poller::Wakeup};
use crate::engine::ready::ReadyEntry;
use crate::engine::{self, cancel, EngineState, SharedEngine};
use crate::error::{Error, Result};
use crate::tracing_compat::debug;
use crate::types::{CancelReason, Settlement, Value};

thread_local! {
    static FRAMES: RefCell<Vec<SharedEngine>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` against the innermost active barrier's engine.
///
/// Fails with a `cross-barrier` error when no barrier is active; every
/// construction and combination API goes through here.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut EngineState) -> Result<R>) -> Result<R> {
    let frame = FRAMES.with(|frames| frames.borrow().last().cloned());
    let Some(frame) = frame else {
        return Err(Error::cross_barrier("no active barrier"));
    };
    let mut state = frame.borrow_mut();
    f(&mut state)
}

struct FrameGuard;

impl FrameGuard {
    fn push(frame: SharedEngine) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(frame));
        Self
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Cooperative interrupt plumbing shared between a controller, its
/// handles, and the loop it is armed to.
pub(crate) struct InterruptState {
    flag: AtomicBool,
    wakeup: Mutex<Option<Arc<Wakeup>>>,
}

impl InterruptState {
    fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            wakeup: Mutex::new(None),
        }
    }

    pub(crate) fn requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn arm(&self, wakeup: Arc<Wakeup>) {
        *self.wakeup.lock() = Some(wakeup);
    }

    fn disarm(&self) {
        *self.wakeup.lock() = None;
    }

    fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        if let Some(wakeup) = self.wakeup.lock().as_ref() {
            wakeup.notify();
        }
    }
}

/// One-shot controller for interrupting a running barrier from outside.
///
/// Pass the controller to [`SyncOptions::with_interrupt`]; keep a
/// [`InterruptHandle`] (they are `Send` and cheap to clone) wherever the
/// interrupt should come from — another thread, a signal-handling crate,
/// a test. Triggering cancels the barrier root with reason `interrupt`
/// and `synchronise` returns an `interrupted`-kind error.
pub struct InterruptController {
    state: Arc<InterruptState>,
}

impl InterruptController {
    /// Creates a new controller.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(InterruptState::new()),
        }
    }

    /// Returns a sendable handle that can trigger the interrupt.
    #[must_use]
    pub fn handle(&self) -> InterruptHandle {
        InterruptHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// Sendable trigger for an [`InterruptController`].
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

impl InterruptHandle {
    /// Requests the interrupt. Idempotent; the barrier sees it at its next
    /// tick (the loop is woken if it is blocked).
    pub fn interrupt(&self) {
        self.state.trigger();
    }
}

/// Options for [`synchronise_with`].
#[derive(Default)]
pub struct SyncOptions {
    config: LoopConfig,
    interrupt: Option<InterruptController>,
}

impl SyncOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the loop configuration.
    #[must_use]
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches an interrupt controller to the barrier.
    #[must_use]
    pub fn with_interrupt(mut self, controller: InterruptController) -> Self {
        self.interrupt = Some(controller);
        self
    }
}

/// Enters a synchronisation barrier with default options.
///
/// `expr` runs in the barrier's construction context: it may only build
/// deferreds, and must return the root. The barrier then drives the DAG
/// rooted there to completion and returns the root's value, or the error
/// it rejected (or was cancelled) with.
pub fn synchronise<F>(expr: F) -> Result<Value>
where
    F: FnOnce() -> Result<Deferred>,
{
    synchronise_with(SyncOptions::default(), expr)
}

/// Enters a synchronisation barrier with explicit options.
pub fn synchronise_with<F>(options: SyncOptions, expr: F) -> Result<Value>
where
    F: FnOnce() -> Result<Deferred>,
{
    let SyncOptions { config, interrupt } = options;

    let mut engine = EngineState::new(config)?;
    let interrupt_state = interrupt.map(|controller| controller.state);
    if let Some(state) = &interrupt_state {
        state.arm(Arc::clone(&engine.wakeup));
    }
    engine.interrupt = interrupt_state.clone();
    let barrier = engine.barrier;
    debug!(barrier = %barrier, "entering barrier");

    let shared: SharedEngine = Rc::new(RefCell::new(engine));
    let guard = FrameGuard::push(Rc::clone(&shared));

    let result = run_barrier(&shared, barrier, expr);

    if let Some(state) = &interrupt_state {
        state.disarm();
    }
    drop(guard);
    debug!(barrier = %barrier, ok = result.is_ok(), "leaving barrier");
    result
}

fn run_barrier<F>(shared: &SharedEngine, barrier: crate::types::BarrierId, expr: F) -> Result<Value>
where
    F: FnOnce() -> Result<Deferred>,
{
    let root = expr()?;
    if root.barrier != barrier {
        return Err(Error::cross_barrier(
            "root deferred belongs to another barrier",
        ));
    }

    {
        let mut state = shared.borrow_mut();
        let root_id = state.check_handle(root)?;
        state.set_root(root_id);
    }

    driver::run(shared)?;

    let outcome = {
        let state = shared.borrow();
        state
            .root
            .and_then(|root| state.settlement_of(root))
            .expect("loop returned with a settled root")
    };

    // Teardown: everything still outstanding — shared nodes included —
    // is cancelled and its registrations released before control returns.
    // A cancelled root (an interrupt, typically) strengthens the sweep
    // reason so stragglers report the real cause.
    {
        let mut state = shared.borrow_mut();
        let mut reason = CancelReason::root_settled();
        if let Settlement::Cancelled(cause) = &outcome {
            reason.strengthen(cause);
        }
        cancel::cancel_all(&mut state, reason);
        state.waits.suppress_all();
    }
    flush_ready(shared);

    match outcome {
        Settlement::Fulfilled(value) => Ok(value),
        Settlement::Rejected(error) => Err(error),
        Settlement::Cancelled(reason) => Err(Error::cancelled(&reason)),
    }
}

/// Drains the ready queue after teardown so observers attached to
/// cancelled branches still hear about it. Deliveries hit terminal nodes
/// and are discarded by the engine.
fn flush_ready(shared: &SharedEngine) {
    loop {
        let entry = shared.borrow_mut().ready.pop();
        match entry {
            Some(ReadyEntry::Deliver {
                target,
                slot,
                settlement,
            }) => engine::process_delivery(shared, target, slot, settlement),
            Some(ReadyEntry::Observe {
                observer,
                settlement,
            }) => observer(&settlement),
            None => break,
        }
    }
}
