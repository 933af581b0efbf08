//! The `delay` source.
//!
//! Registers one deadline with the loop's timer queue and fulfils with the
//! unit payload when it fires. A timeout over any operation is just
//! `when_any(op, delay(t))` with rejection rewriting; no dedicated
//! primitive exists in the core.

use std::time::Duration;

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::driver::timer::TimerToken;
use crate::error::Result;
use crate::source::{Readiness, SourceAdapter, SourceContext};
use crate::types::Value;

struct DelaySource {
    duration: Duration,
    token: Option<TimerToken>,
}

impl SourceAdapter for DelaySource {
    fn start(&mut self, cx: &mut SourceContext<'_>) {
        let deadline = cx.now() + self.duration;
        self.token = Some(cx.register_timer(deadline));
    }

    fn on_ready(&mut self, event: Readiness, cx: &mut SourceContext<'_>) {
        if let Readiness::Timer(token) = event {
            if self.token == Some(token) {
                self.token = None;
                cx.fulfil(Value::unit());
            }
        }
    }

    fn abort(&mut self) {
        // The engine releases the timer registration; nothing else held.
        self.token = None;
    }
}

/// A deferred that fulfils with the unit payload after `duration`.
pub fn delay(duration: Duration) -> Result<Deferred> {
    with_engine(|state| {
        let node = state.insert_source(Box::new(DelaySource {
            duration,
            token: None,
        }));
        Ok(Deferred::new(state.barrier, node))
    })
}
