//! `when_all`: wait for every parent.
//!
//! Fulfils with the parent results in **input order** once every parent
//! has fulfilled, however they interleave on the clock. The first
//! rejection (settlement order, parent index breaking ties within a tick)
//! rejects the join and cancels the still-pending siblings.

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::error::Result;
use crate::node::Role;
use crate::types::{Settlement, Value};

/// Joins `parents`, fulfilling with their results in input order.
///
/// `when_all(&[])` fulfils immediately with an empty sequence. The result
/// payload is a `Vec<Value>`.
pub fn when_all(parents: &[Deferred]) -> Result<Deferred> {
    with_engine(|state| {
        let ids = parents
            .iter()
            .map(|d| state.check_handle(*d))
            .collect::<Result<Vec<_>>>()?;
        state.precheck_adoption(&ids)?;

        let count = ids.len();
        let child = state.insert_combinator(Role::All {
            results: vec![None; count],
            pending: count,
        });
        for id in &ids {
            state.adopt(*id, child)?;
        }
        if count == 0 {
            state.settle(child, Settlement::Fulfilled(Value::new(Vec::<Value>::new())));
        }
        Ok(Deferred::new(state.barrier, child))
    })
}
