//! Identifier types for engine entities.
//!
//! Deferred nodes live in their barrier's slab, so a [`DeferredId`] wraps
//! a slot index with type safety. Barriers themselves are identified by a
//! process-unique counter so a handle can be checked against the barrier
//! it escaped from.

use crate::util::SlotId;
use core::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static BARRIER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for one deferred node within its barrier's slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredId(pub(crate) SlotId);

impl DeferredId {
    /// Creates a deferred ID from a slab slot (internal use).
    #[must_use]
    pub(crate) const fn from_slot(slot: SlotId) -> Self {
        Self(slot)
    }

    /// Returns the underlying slab slot (internal use).
    #[must_use]
    pub(crate) const fn slot(self) -> SlotId {
        self.0
    }

    /// Creates a deferred ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32) -> Self {
        Self(SlotId::new(index))
    }
}

impl fmt::Debug for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeferredId({})", self.0.index())
    }
}

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0.index())
    }
}

/// A process-unique identifier for a synchronisation barrier.
///
/// Every deferred handle carries the ID of the barrier that owns its node;
/// operations check it against the innermost active barrier and fail with a
/// cross-barrier error on mismatch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierId(u64);

impl BarrierId {
    /// Allocates the next process-unique barrier ID.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(BARRIER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a barrier ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BarrierId({})", self.0)
    }
}

impl fmt::Display for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A logical timestamp for the event loop, in nanoseconds since the loop
/// started. Timer deadlines are expressed on this clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The loop-start instant.
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since loop start.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since loop start.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns the time as nanoseconds since loop start.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the duration until `later`, or zero if `later` is in the past.
    #[must_use]
    pub const fn until(self, later: Self) -> Duration {
        Duration::from_nanos(later.0.saturating_sub(self.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_nanos(u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_ids_are_unique() {
        let a = BarrierId::next();
        let b = BarrierId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn time_conversions() {
        assert_eq!(Time::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(Time::from_nanos(1_500_000_000).as_millis(), 1500);
    }

    #[test]
    fn time_add_duration() {
        let t = Time::from_millis(10) + Duration::from_millis(5);
        assert_eq!(t.as_millis(), 15);
    }

    #[test]
    fn time_until_is_saturating() {
        let early = Time::from_millis(5);
        let late = Time::from_millis(8);
        assert_eq!(early.until(late), Duration::from_millis(3));
        assert_eq!(late.until(early), Duration::ZERO);
    }

    #[test]
    fn deferred_id_display_uses_index() {
        let id = DeferredId::new_for_test(7);
        assert_eq!(id.to_string(), "D7");
    }
}
