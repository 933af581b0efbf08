//! Immediate sources: `constant` and `rejected`.
//!
//! Both settle the moment the loop starts them. They exist mostly as chain
//! heads and as deterministic fixtures; laziness still applies, so an
//! unconsumed `constant` is never evaluated.

use core::any::Any;

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::source::{SourceAdapter, SourceContext};
use crate::types::Value;

struct ConstantSource {
    value: Option<Value>,
}

impl SourceAdapter for ConstantSource {
    fn start(&mut self, cx: &mut SourceContext<'_>) {
        if let Some(value) = self.value.take() {
            cx.fulfil(value);
        }
    }

    fn abort(&mut self) {
        self.value = None;
    }
}

struct RejectedSource {
    error: Option<Error>,
}

impl SourceAdapter for RejectedSource {
    fn start(&mut self, cx: &mut SourceContext<'_>) {
        if let Some(error) = self.error.take() {
            cx.reject(error);
        }
    }

    fn abort(&mut self) {
        self.error = None;
    }
}

/// A deferred that fulfils with `value` as soon as it is started.
pub fn constant<T: Any>(value: T) -> Result<Deferred> {
    with_engine(|state| {
        let node = state.insert_source(Box::new(ConstantSource {
            value: Some(Value::new(value)),
        }));
        Ok(Deferred::new(state.barrier, node))
    })
}

/// A deferred that rejects with `error` as soon as it is started.
pub fn rejected(error: Error) -> Result<Deferred> {
    with_engine(|state| {
        let node = state.insert_source(Box::new(RejectedSource {
            error: Some(error),
        }));
        Ok(Deferred::new(state.barrier, node))
    })
}
