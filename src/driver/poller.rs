//! OS poller and the loop-owned wakeup channel.
//!
//! The event loop blocks in [`Wakeup::wait`] between ticks. Two things can
//! end the wait early: the next timer deadline, or a notification posted by
//! a thread-backed adapter through [`RemoteSettle`] (the only cross-thread
//! entry into the engine — its sole effect is to enqueue an event the loop
//! turns into a ready-queue entry).
//!
//! # I/O registration
//!
//! This crate forbids unsafe code, and registering raw file descriptors
//! with the `polling` crate's poller is `unsafe` (the poller cannot verify
//! the descriptor outlives the registration). The I/O registration surface
//! is therefore interface-complete but bookkeeping-only: tokens and
//! interest sets are tracked and the dispatch path exists, while actual
//! readiness events only arrive through timers and the wakeup channel.

use crate::error::Error;
use crate::types::DeferredId;
use core::any::Any;
use core::fmt;
use crossbeam_queue::SegQueue;
use polling::{Events, Poller};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle to one bookkept I/O registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoToken(pub(crate) u64);

/// Readiness interest for an I/O registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// Wake when the handle becomes readable.
    pub readable: bool,
    /// Wake when the handle becomes writable.
    pub writable: bool,
}

impl Interest {
    /// Read-only interest.
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };

    /// Write-only interest.
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
}

/// A settlement posted from an adapter thread.
pub(crate) struct RemoteEvent {
    /// The node this settlement targets.
    pub node: DeferredId,
    /// The payload; converted to a `Value` on the loop thread.
    pub outcome: Result<Box<dyn Any + Send>, Error>,
}

/// The loop-owned wakeup channel: an MPSC injector plus poller notification.
///
/// Cloneable across threads via `Arc`; the loop side drains, the adapter
/// side posts.
pub(crate) struct Wakeup {
    poller: Poller,
    injector: SegQueue<RemoteEvent>,
}

impl Wakeup {
    pub(crate) fn new() -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            poller: Poller::new()?,
            injector: SegQueue::new(),
        }))
    }

    /// Posts a remote event and wakes the loop. Callable from any thread.
    pub(crate) fn post(&self, event: RemoteEvent) {
        self.injector.push(event);
        let _ = self.poller.notify();
    }

    /// Wakes the loop without posting an event (interrupt path).
    pub(crate) fn notify(&self) {
        let _ = self.poller.notify();
    }

    /// Blocks until notified or until `timeout` elapses.
    ///
    /// `None` blocks indefinitely; remote posts and interrupts still wake
    /// the poller through its notify path.
    pub(crate) fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        self.poller.wait(events, timeout)
    }

    /// Drains every queued remote event.
    pub(crate) fn drain(&self) -> Vec<RemoteEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.injector.pop() {
            drained.push(event);
        }
        drained
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wakeup")
            .field("queued", &self.injector.len())
            .finish()
    }
}

/// A `Send` settlement handle bound to one node.
///
/// This is the cross-thread half of the source-adapter contract: a worker
/// or watcher thread calls [`fulfil`](Self::fulfil) or
/// [`reject`](Self::reject) exactly once; the loop converts the event into
/// an ordinary settlement. After [`suppress`](Self::suppress) the handle
/// goes quiet, which is how soft cancellation of thread-backed work is
/// implemented.
pub struct RemoteSettle {
    node: DeferredId,
    wakeup: Arc<Wakeup>,
    suppressed: Arc<AtomicBool>,
}

impl RemoteSettle {
    pub(crate) fn new(node: DeferredId, wakeup: Arc<Wakeup>) -> Self {
        Self {
            node,
            wakeup,
            suppressed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a flag that, once set, silences this handle.
    pub(crate) fn suppress_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.suppressed)
    }

    /// Marks the handle suppressed; later settlements are dropped.
    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::Release);
    }

    /// Posts a fulfilment payload to the loop.
    pub fn fulfil(&self, payload: Box<dyn Any + Send>) {
        if !self.suppressed.load(Ordering::Acquire) {
            self.wakeup.post(RemoteEvent {
                node: self.node,
                outcome: Ok(payload),
            });
        }
    }

    /// Posts a rejection to the loop.
    pub fn reject(&self, error: Error) {
        if !self.suppressed.load(Ordering::Acquire) {
            self.wakeup.post(RemoteEvent {
                node: self.node,
                outcome: Err(error),
            });
        }
    }
}

impl fmt::Debug for RemoteSettle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettle")
            .field("node", &self.node)
            .field("suppressed", &self.suppressed.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug)]
struct IoRegistration {
    node: DeferredId,
    interest: Interest,
}

/// Bookkeeping table for I/O registrations (see module docs).
#[derive(Debug, Default)]
pub(crate) struct IoRegistry {
    registrations: HashMap<u64, IoRegistration>,
    next_token: u64,
}

impl IoRegistry {
    pub(crate) fn register(&mut self, node: DeferredId, interest: Interest) -> IoToken {
        let token = self.next_token;
        self.next_token += 1;
        self.registrations
            .insert(token, IoRegistration { node, interest });
        IoToken(token)
    }

    pub(crate) fn cancel(&mut self, token: IoToken) {
        self.registrations.remove(&token.0);
    }

    /// Looks up the node and interest behind a fired event key.
    pub(crate) fn lookup(&self, token: IoToken) -> Option<(DeferredId, Interest)> {
        self.registrations
            .get(&token.0)
            .map(|reg| (reg.node, reg.interest))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u32) -> DeferredId {
        DeferredId::new_for_test(n)
    }

    #[test]
    fn post_then_drain_round_trips() {
        let wakeup = Wakeup::new().expect("poller");
        wakeup.post(RemoteEvent {
            node: node(1),
            outcome: Ok(Box::new(5_i32)),
        });

        let drained = wakeup.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].node, node(1));
    }

    #[test]
    fn notify_ends_wait() {
        let wakeup = Wakeup::new().expect("poller");
        let remote = Arc::clone(&wakeup);
        let handle = std::thread::spawn(move || {
            remote.notify();
        });

        let mut events = Events::new();
        wakeup
            .wait(&mut events, Some(Duration::from_secs(5)))
            .expect("wait");
        handle.join().expect("notify thread");
    }

    #[test]
    fn suppressed_handle_goes_quiet() {
        let wakeup = Wakeup::new().expect("poller");
        let settle = RemoteSettle::new(node(2), Arc::clone(&wakeup));
        settle.suppress();
        settle.fulfil(Box::new(()));
        assert!(wakeup.drain().is_empty());
    }

    #[test]
    fn io_registry_bookkeeping() {
        let mut registry = IoRegistry::default();
        let token = registry.register(node(3), Interest::READABLE);
        assert_eq!(registry.len(), 1);
        let (owner, interest) = registry.lookup(token).expect("registered");
        assert_eq!(owner, node(3));
        assert!(interest.readable);

        registry.cancel(token);
        assert!(registry.lookup(token).is_none());
    }
}
