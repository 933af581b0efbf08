//! Adefer: a single-threaded cooperative deferred-value runtime.
//!
//! # Overview
//!
//! A deferred value is a placeholder for a result that will be produced
//! later — by a timer, an external process, a worker thread. User code is
//! written in synchronous style; entering a *synchronisation barrier* with
//! a root deferred spins a dedicated event loop that drives the DAG of
//! deferred values rooted there to completion (or failure) and returns the
//! result to the caller.
//!
//! # Core Guarantees
//!
//! - **Single ownership**: a non-shared deferred has at most one consumer;
//!   a second `then` fails immediately with an `ownership` error
//! - **Laziness**: only deferreds reachable from the barrier root are ever
//!   started; orphans are garbage-collected at teardown, never run
//! - **Structured auto-cancellation**: when a join settles or the root
//!   terminates, everything whose result is no longer needed is cancelled
//!   upward through the DAG and its adapter aborted
//! - **Barrier-bounded lifetime**: every node lives in its barrier's
//!   slab; teardown cancels stragglers (shared nodes included) and
//!   releases their registrations before `synchronise` returns
//! - **Cross-barrier hygiene**: a deferred used outside its own barrier
//!   fails every operation with a `cross-barrier` error
//!
//! # Example
//!
//! ```
//! use adefer::{constant, synchronise, Step};
//!
//! let result = synchronise(|| {
//!     constant(21_i32)?.then(|v| {
//!         let n = v.extract::<i32>().unwrap_or_default();
//!         Ok(Step::of(n * 2))
//!     })
//! })
//! .expect("barrier succeeds");
//! assert_eq!(result.extract::<i32>(), Some(42));
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, cancellation reasons, settlements, payloads
//! - [`error`]: the closed error-kind set and the engine error type
//! - [`deferred`]: the public handle and callback continuations
//! - [`combinator`]: `then`/`catch`/`finally`, joins, `share`
//! - [`barrier`]: `synchronise`, nesting, interrupts, teardown
//! - [`driver`]: the event loop — timers, poller, process waits
//! - [`source`]: the adapter contract and the shipped sources
//! - [`config`]: loop tunables (JSON + environment)
//! - [`test_utils`]: logging init and fixtures for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod barrier;
pub mod combinator;
pub mod config;
pub mod deferred;
pub mod driver;
pub mod error;
pub mod source;
pub mod test_utils;
pub mod tracing_compat;
pub mod types;

mod engine;
mod node;
mod util;

// Re-exports for convenient access to the core API.
pub use barrier::{synchronise, synchronise_with, InterruptController, InterruptHandle, SyncOptions};
pub use combinator::{when_all, when_any, when_some, AllFailed};
pub use config::{ConfigError, LoopConfig};
pub use deferred::{Deferred, Step};
pub use driver::poller::{Interest, IoToken, RemoteSettle};
pub use driver::timer::TimerToken;
pub use driver::wait::{ProcessOutput, WaitToken};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use node::NodeState;
pub use source::constant::{constant, rejected};
pub use source::process::{run_command, CommandSpec};
pub use source::timer::delay;
pub use source::worker::WorkerPool;
pub use source::{Readiness, SourceAdapter, SourceContext};
pub use types::{CancelKind, CancelReason, PanicPayload, Settlement, Time, Value};
