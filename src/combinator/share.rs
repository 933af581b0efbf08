//! `share`: multi-consumer opt-in.
//!
//! A shared deferred may be adopted by any number of children, starts when
//! the first of them is reachable from the root, multicasts its single
//! outcome to every child, and is exempt from auto-cancellation until
//! barrier teardown.

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::error::Result;

/// Marks `deferred` as shared and returns the same handle.
pub fn share(deferred: Deferred) -> Result<Deferred> {
    with_engine(|state| {
        let id = state.check_handle(deferred)?;
        state.mark_shared(id);
        Ok(deferred)
    })
}
