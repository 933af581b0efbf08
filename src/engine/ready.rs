//! The FIFO ready queue.
//!
//! Everything that becomes runnable — a child callback made ready by a
//! parent settlement, an observer notification — enters this queue and is
//! drained strictly in enqueue order. That single discipline provides all
//! the ordering guarantees the engine makes: callbacks attached to one
//! deferred fire in attachment order, and settlements landing in the same
//! tick run in settlement order.

use std::collections::VecDeque;

use crate::node::Observer;
use crate::types::{DeferredId, Settlement};

/// One runnable unit.
pub(crate) enum ReadyEntry {
    /// A parent settlement awaiting consumption by `target`'s role.
    Deliver {
        target: DeferredId,
        /// Index into the target's parent list this settlement fills.
        slot: usize,
        settlement: Settlement,
    },
    /// A non-owning observer notification.
    Observe {
        observer: Observer,
        settlement: Settlement,
    },
}

/// Strict-FIFO queue of runnable units.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    queue: VecDeque<ReadyEntry>,
}

impl ReadyQueue {
    pub(crate) fn push_delivery(&mut self, target: DeferredId, slot: usize, settlement: Settlement) {
        self.queue.push_back(ReadyEntry::Deliver {
            target,
            slot,
            settlement,
        });
    }

    pub(crate) fn push_observer(&mut self, observer: Observer, settlement: Settlement) {
        self.queue.push_back(ReadyEntry::Observe {
            observer,
            settlement,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<ReadyEntry> {
        self.queue.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl core::fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadyQueue")
            .field("len", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = ReadyQueue::default();
        queue.push_delivery(
            DeferredId::new_for_test(1),
            0,
            Settlement::Fulfilled(Value::unit()),
        );
        queue.push_delivery(
            DeferredId::new_for_test(2),
            0,
            Settlement::Fulfilled(Value::unit()),
        );

        assert_eq!(queue.len(), 2);
        match queue.pop() {
            Some(ReadyEntry::Deliver { target, .. }) => {
                assert_eq!(target, DeferredId::new_for_test(1));
            }
            _ => panic!("expected first delivery"),
        }
        match queue.pop() {
            Some(ReadyEntry::Deliver { target, .. }) => {
                assert_eq!(target, DeferredId::new_for_test(2));
            }
            _ => panic!("expected second delivery"),
        }
        assert!(queue.pop().is_none());
    }
}
