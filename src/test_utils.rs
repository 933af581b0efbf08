//! Shared helpers for unit and integration tests.
//!
//! - Init-once tracing subscriber so test output is readable
//! - A `never` source for cancellation and teardown scenarios
//! - Downcast helpers for pulling concrete values out of barrier results

use core::any::Any;
use std::sync::Once;

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::error::Result;
use crate::source::{SourceAdapter, SourceContext};
use crate::types::Value;

static INIT_LOGGING: Once = Once::new();

/// Initialises test logging from `RUST_LOG` (default `debug`).
///
/// Safe to call from every test; only the first call does anything.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

struct NeverSource;

impl SourceAdapter for NeverSource {
    fn start(&mut self, _cx: &mut SourceContext<'_>) {}

    fn abort(&mut self) {}
}

/// A deferred that never settles on its own. Useful for exercising
/// cancellation, teardown, and race-loser paths.
pub fn never() -> Result<Deferred> {
    with_engine(|state| {
        let node = state.insert_source(Box::new(NeverSource));
        Ok(Deferred::new(state.barrier, node))
    })
}

/// Unwraps a barrier result and downcasts its payload.
///
/// # Panics
/// Panics with a readable message when the result is an error or the
/// payload has a different type; this is a test helper.
#[must_use]
pub fn expect_value<T: Any + Clone>(result: Result<Value>) -> T {
    let value = result.expect("barrier returned an error");
    value
        .extract::<T>()
        .expect("barrier value had an unexpected type")
}

/// Downcasts a join payload (`Vec<Value>`) into concrete elements.
///
/// # Panics
/// Panics when the payload is not a `Vec<Value>` of `T`s.
#[must_use]
pub fn expect_values<T: Any + Clone>(result: Result<Value>) -> Vec<T> {
    let value = result.expect("barrier returned an error");
    let items = value
        .extract::<Vec<Value>>()
        .expect("barrier value was not a join result");
    items
        .iter()
        .map(|item| {
            item.extract::<T>()
                .expect("join element had an unexpected type")
        })
        .collect()
}
