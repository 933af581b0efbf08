//! Sequential combinators: `then`, `catch`, `finally`.
//!
//! Each builds a single-parent child node whose callback the engine runs
//! when the parent settles. Ownership is checked before any edge is
//! created, so a violation surfaces from the constructing call and leaves
//! the graph untouched.

use crate::barrier::with_engine;
use crate::deferred::{Deferred, Step};
use crate::error::{Error, ErrorKind, Result};
use crate::node::Role;
use crate::types::Value;

pub(crate) fn then<F>(parent: Deferred, on_fulfil: F) -> Result<Deferred>
where
    F: FnOnce(Value) -> Result<Step> + 'static,
{
    attach(parent, Role::Then {
        on_fulfil: Some(Box::new(on_fulfil)),
    })
}

pub(crate) fn catch<F>(
    parent: Deferred,
    kinds: Option<Vec<ErrorKind>>,
    on_reject: F,
) -> Result<Deferred>
where
    F: FnOnce(Error) -> Result<Step> + 'static,
{
    attach(parent, Role::Catch {
        on_reject: Some(Box::new(on_reject)),
        kinds,
    })
}

pub(crate) fn finally<F>(parent: Deferred, on_final: F) -> Result<Deferred>
where
    F: FnOnce() -> Result<Step> + 'static,
{
    attach(parent, Role::Finally {
        on_final: Some(Box::new(on_final)),
    })
}

fn attach(parent: Deferred, role: Role) -> Result<Deferred> {
    with_engine(|state| {
        let parent_id = state.check_handle(parent)?;
        state.precheck_adoption(&[parent_id])?;
        let child = state.insert_combinator(role);
        state.adopt(parent_id, child)?;
        Ok(Deferred::new(state.barrier, child))
    })
}
