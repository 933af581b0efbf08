//! Cancellation reason and kind types.
//!
//! Cancellation is structured: every cancelled node records why its result
//! stopped being needed. Reasons form a severity order so that a node hit by
//! several cancellation causes keeps the strongest one.

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Another branch of a `when_any` settled first.
    RaceLost,
    /// A sibling branch of a `when_all` rejected.
    SiblingFailed,
    /// A `when_some` reached (or lost) its quorum without this branch.
    QuorumClosed,
    /// The barrier root settled while this branch was still outstanding.
    RootSettled,
    /// The barrier is tearing down.
    Teardown,
    /// The barrier was interrupted from outside.
    Interrupt,
}

impl CancelKind {
    /// Returns the severity of this cancellation kind.
    ///
    /// Higher severity reasons win when strengthening.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::RaceLost | Self::SiblingFailed | Self::QuorumClosed => 0,
            Self::RootSettled => 1,
            Self::Teardown => 2,
            Self::Interrupt => 3,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RaceLost => write!(f, "race lost"),
            Self::SiblingFailed => write!(f, "sibling failed"),
            Self::QuorumClosed => write!(f, "quorum closed"),
            Self::RootSettled => write!(f, "root settled"),
            Self::Teardown => write!(f, "teardown"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// The reason for a cancellation, including kind and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional message (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a race-loser reason.
    #[must_use]
    pub const fn race_lost() -> Self {
        Self::new(CancelKind::RaceLost)
    }

    /// Creates a sibling-failed reason.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::SiblingFailed)
    }

    /// Creates a quorum-closed reason.
    #[must_use]
    pub const fn quorum_closed() -> Self {
        Self::new(CancelKind::QuorumClosed)
    }

    /// Creates a root-settled reason.
    #[must_use]
    pub const fn root_settled() -> Self {
        Self::new(CancelKind::RootSettled)
    }

    /// Creates a teardown reason.
    #[must_use]
    pub const fn teardown() -> Self {
        Self::new(CancelKind::Teardown)
    }

    /// Creates an interrupt reason.
    #[must_use]
    pub const fn interrupt() -> Self {
        Self::new(CancelKind::Interrupt)
    }

    /// Attaches a static message.
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// Returns the kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns true if this reason is an external interrupt.
    #[must_use]
    pub const fn is_interrupt(&self) -> bool {
        matches!(self.kind, CancelKind::Interrupt)
    }

    /// Strengthens this reason with another, keeping the more severe one.
    ///
    /// Returns `true` if the reason was changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind.severity() > self.kind.severity() {
            self.kind = other.kind;
            self.message = other.message;
            return true;
        }

        if other.kind.severity() < self.kind.severity() {
            return false;
        }

        match (self.message, other.message) {
            (None, Some(msg)) => {
                self.message = Some(msg);
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.message = Some(candidate);
                true
            }
            _ => false,
        }
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::RootSettled)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(CancelKind::RaceLost.severity() < CancelKind::RootSettled.severity());
        assert!(CancelKind::RootSettled.severity() < CancelKind::Teardown.severity());
        assert!(CancelKind::Teardown.severity() < CancelKind::Interrupt.severity());
    }

    #[test]
    fn strengthen_takes_more_severe() {
        let mut reason = CancelReason::race_lost();
        assert!(reason.strengthen(&CancelReason::teardown()));
        assert_eq!(reason.kind, CancelKind::Teardown);

        assert!(reason.strengthen(&CancelReason::interrupt()));
        assert_eq!(reason.kind, CancelKind::Interrupt);

        // Less severe does not change the reason.
        assert!(!reason.strengthen(&CancelReason::root_settled()));
        assert_eq!(reason.kind, CancelKind::Interrupt);
    }

    #[test]
    fn strengthen_is_idempotent() {
        let mut reason = CancelReason::sibling_failed();
        assert!(!reason.strengthen(&CancelReason::sibling_failed()));
        assert_eq!(reason.kind, CancelKind::SiblingFailed);
    }

    #[test]
    fn strengthen_same_severity_picks_deterministic_message() {
        let mut reason = CancelReason::race_lost().with_message("b");
        assert!(reason.strengthen(&CancelReason::race_lost().with_message("a")));
        assert_eq!(reason.message, Some("a"));
    }

    #[test]
    fn display_includes_message() {
        let reason = CancelReason::teardown().with_message("barrier closing");
        assert_eq!(reason.to_string(), "teardown: barrier closing");
    }
}
