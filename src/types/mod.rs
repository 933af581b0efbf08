//! Core types for the deferred-value engine.
//!
//! This module collects the small value types the rest of the crate builds
//! on: identifiers, cancellation reasons, settlements, and the dynamically
//! typed result payload.

pub mod cancel;
pub mod id;
pub mod settlement;
pub mod value;

pub use cancel::{CancelKind, CancelReason};
pub use id::{BarrierId, DeferredId, Time};
pub use settlement::{PanicPayload, Settlement};
pub use value::Value;
