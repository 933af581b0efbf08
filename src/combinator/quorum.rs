//! `when_some`: first `n` fulfilments win.
//!
//! Fulfils with the first `need` parent results in **settlement order**
//! and cancels the rest. Rejects with kind `insufficient` the moment fewer
//! than `need` successes remain arithmetically possible, cancelling
//! whatever is still pending.

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::error::{Error, ErrorKind, Result};
use crate::node::Role;
use crate::types::{Settlement, Value};

/// Joins `parents`, fulfilling once `need` of them have fulfilled.
///
/// `when_some(0, …)` fulfils immediately with an empty sequence; asking
/// for more fulfilments than there are parents rejects at construction.
/// The result payload is a `Vec<Value>` in settlement order.
pub fn when_some(need: usize, parents: &[Deferred]) -> Result<Deferred> {
    with_engine(|state| {
        let ids = parents
            .iter()
            .map(|d| state.check_handle(*d))
            .collect::<Result<Vec<_>>>()?;
        state.precheck_adoption(&ids)?;

        let count = ids.len();
        let child = state.insert_combinator(Role::Quorum {
            need,
            results: Vec::new(),
            pending: count,
        });
        for id in &ids {
            state.adopt(*id, child)?;
        }

        if need == 0 {
            state.settle(child, Settlement::Fulfilled(Value::new(Vec::<Value>::new())));
        } else if count < need {
            state.settle(
                child,
                Settlement::Rejected(Error::new(ErrorKind::Insufficient).with_context(format!(
                    "needed {need} fulfilments from {count} branches"
                ))),
            );
        }
        Ok(Deferred::new(state.barrier, child))
    })
}
