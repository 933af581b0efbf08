//! Timer queue for deadline-driven wakeups.
//!
//! A small min-heap of `(deadline, token)` pairs. Cancellation is O(1):
//! the token is dropped from the live table and the heap entry is discarded
//! lazily when it surfaces.

use crate::types::{DeferredId, Time};
use core::fmt;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Handle to one registered timer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl fmt::Debug for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerToken({})", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    token: TimerToken,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first); token
        // order breaks ties FIFO since tokens are allocated monotonically.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.token.cmp(&self.token))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline, keyed by cancellable tokens.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    live: HashMap<TimerToken, DeferredId>,
    next_token: u64,
}

impl TimerHeap {
    /// Creates a new empty timer heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if no live timers remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Registers a timer for a node with the given deadline.
    pub fn register(&mut self, node: DeferredId, deadline: Time) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.live.insert(token, node);
        self.heap.push(TimerEntry { deadline, token });
        token
    }

    /// Cancels a timer. Idempotent; unknown tokens are ignored.
    pub fn cancel(&mut self, token: TimerToken) {
        self.live.remove(&token);
    }

    /// Returns the earliest live deadline, if any.
    ///
    /// Entries whose token was cancelled are pruned on the way.
    pub fn next_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.heap.peek() {
            if self.live.contains_key(&entry.token) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops all timers whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Time) -> Vec<(TimerToken, DeferredId)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry");
            if let Some(node) = self.live.remove(&entry.token) {
                expired.push((entry.token, node));
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u32) -> DeferredId {
        DeferredId::new_for_test(n)
    }

    #[test]
    fn expires_in_deadline_order() {
        let mut timers = TimerHeap::new();
        timers.register(node(1), Time::from_millis(20));
        timers.register(node(2), Time::from_millis(10));

        let fired = timers.pop_expired(Time::from_millis(15));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, node(2));

        let fired = timers.pop_expired(Time::from_millis(25));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, node(1));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut timers = TimerHeap::new();
        let token = timers.register(node(1), Time::from_millis(5));
        timers.cancel(token);

        assert!(timers.pop_expired(Time::from_millis(10)).is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn next_deadline_skips_cancelled() {
        let mut timers = TimerHeap::new();
        let early = timers.register(node(1), Time::from_millis(1));
        timers.register(node(2), Time::from_millis(9));
        timers.cancel(early);

        assert_eq!(timers.next_deadline(), Some(Time::from_millis(9)));
    }

    #[test]
    fn ties_fire_in_registration_order() {
        let mut timers = TimerHeap::new();
        timers.register(node(1), Time::from_millis(5));
        timers.register(node(2), Time::from_millis(5));

        let fired = timers.pop_expired(Time::from_millis(5));
        assert_eq!(fired[0].1, node(1));
        assert_eq!(fired[1].1, node(2));
    }
}
