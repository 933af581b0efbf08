//! The source-adapter contract.
//!
//! Anything that produces a settlement from outside the engine — a timer,
//! an external process, a worker call — plugs into the core through
//! [`SourceAdapter`]. The engine stays ignorant of what the adapter does;
//! it only starts it, forwards readiness events, and aborts it when the
//! result stops being needed.
//!
//! Adapters interact with the loop exclusively through [`SourceContext`]:
//! exactly-once settlement, readiness registration, and — for thread-backed
//! adapters — a `Send` remote-settle handle whose only effect is to enqueue
//! a wakeup-channel entry.
//!
//! `abort` takes no context on purpose: the engine releases every
//! registration the adapter made before calling it, so `abort` only touches
//! adapter-private resources and must be idempotent. After the first call
//! the adapter must not settle again; the loop discards late events anyway.

pub mod constant;
pub mod process;
pub mod timer;
pub mod worker;

use crate::driver::poller::{Interest, IoRegistry, IoToken, RemoteSettle, Wakeup};
use crate::driver::timer::{TimerHeap, TimerToken};
use crate::driver::wait::{WaitTable, WaitToken};
use crate::error::Error;
use crate::node::Registrations;
use crate::types::{DeferredId, Time, Value};
use std::process::Child;
use std::sync::Arc;

/// A readiness event delivered to the adapter that registered it.
#[derive(Debug, Clone, Copy)]
pub enum Readiness {
    /// A registered timer reached its deadline.
    Timer(TimerToken),
    /// A registered I/O handle became ready.
    Io {
        /// The registration this event belongs to.
        token: IoToken,
        /// Readable side fired.
        readable: bool,
        /// Writable side fired.
        writable: bool,
    },
}

/// Pending settlements produced synchronously on the loop thread.
pub(crate) type SettleQueue = Vec<(DeferredId, Result<Value, Error>)>;

/// The adapter's window into the engine, valid for one call.
pub struct SourceContext<'a> {
    pub(crate) node: DeferredId,
    pub(crate) now: Time,
    pub(crate) settled: &'a mut SettleQueue,
    pub(crate) timers: &'a mut TimerHeap,
    pub(crate) io: &'a mut IoRegistry,
    pub(crate) waits: &'a mut WaitTable,
    pub(crate) wakeup: &'a Arc<Wakeup>,
    pub(crate) regs: &'a mut Registrations,
}

impl SourceContext<'_> {
    /// The node this adapter is bound to.
    #[must_use]
    pub fn node(&self) -> DeferredId {
        self.node
    }

    /// The loop's current logical time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.now
    }

    /// Settles the node with a value. The first settlement wins; the engine
    /// ignores anything after it.
    pub fn fulfil(&mut self, value: Value) {
        self.settled.push((self.node, Ok(value)));
    }

    /// Settles the node with an error.
    pub fn reject(&mut self, error: Error) {
        self.settled.push((self.node, Err(error)));
    }

    /// Registers a timer; the adapter's `on_ready` fires at the deadline.
    pub fn register_timer(&mut self, deadline: Time) -> TimerToken {
        let token = self.timers.register(self.node, deadline);
        self.regs.timers.push(token);
        token
    }

    /// Cancels a previously registered timer. Idempotent.
    pub fn cancel_timer(&mut self, token: TimerToken) {
        self.timers.cancel(token);
    }

    /// Cancels a previously registered I/O interest. Idempotent.
    pub fn cancel_io(&mut self, token: IoToken) {
        self.io.cancel(token);
    }

    /// Soft-cancels a process wait: the child keeps running but its
    /// settlement is suppressed. Idempotent.
    pub fn cancel_wait(&mut self, token: WaitToken) {
        self.waits.cancel(token);
    }

    /// Registers I/O interest for this node (bookkeeping; see
    /// [`crate::driver::poller`] module docs for the functional limits).
    pub fn register_io(&mut self, interest: Interest) -> IoToken {
        let token = self.io.register(self.node, interest);
        self.regs.io.push(token);
        token
    }

    /// Hands a child process to a watcher; the node settles with a
    /// [`crate::driver::wait::ProcessOutput`] payload when it exits.
    pub fn register_wait(&mut self, child: Child) -> WaitToken {
        let token = self.waits.register(self.node, child, Arc::clone(self.wakeup));
        self.regs.waits.push(token);
        token
    }

    /// Returns a `Send` settlement handle for thread-backed adapters.
    #[must_use]
    pub fn remote(&self) -> RemoteSettle {
        RemoteSettle::new(self.node, Arc::clone(self.wakeup))
    }
}

/// The contract every async source satisfies to plug into the engine.
pub trait SourceAdapter {
    /// Begins work. Called once, when the node becomes reachable from the
    /// barrier root and the loop reaches it.
    fn start(&mut self, cx: &mut SourceContext<'_>);

    /// Delivers a readiness event this adapter registered for.
    ///
    /// The default does nothing; adapters that settle purely through the
    /// remote path never see readiness events.
    fn on_ready(&mut self, event: Readiness, cx: &mut SourceContext<'_>) {
        let _ = (event, cx);
    }

    /// Idempotent request to stop. After the first call the adapter must
    /// not settle again.
    fn abort(&mut self);
}
