//! `when_any`: first fulfilment wins.
//!
//! Fulfils with the first parent result and cancels the losers with reason
//! `race lost`. Rejects only when every parent has rejected, with an
//! `all-failed` error whose source is an [`AllFailed`] aggregate carrying
//! the parent errors in index order.

use core::fmt;

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::error::{Error, ErrorKind, Result};
use crate::node::Role;
use crate::types::Settlement;

/// Aggregate of every branch error from an exhausted `when_any`.
#[derive(Debug, Clone)]
pub struct AllFailed {
    errors: Vec<Error>,
}

impl AllFailed {
    pub(crate) fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }

    /// The branch errors, in parent index order.
    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl fmt::Display for AllFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} branches rejected", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            write!(f, "; [{index}] {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AllFailed {}

/// Races `parents`, fulfilling with the first result.
///
/// `when_any(&[])` rejects immediately with an empty aggregate.
pub fn when_any(parents: &[Deferred]) -> Result<Deferred> {
    with_engine(|state| {
        let ids = parents
            .iter()
            .map(|d| state.check_handle(*d))
            .collect::<Result<Vec<_>>>()?;
        state.precheck_adoption(&ids)?;

        let count = ids.len();
        let child = state.insert_combinator(Role::Any {
            errors: vec![None; count],
            pending: count,
        });
        for id in &ids {
            state.adopt(*id, child)?;
        }
        if count == 0 {
            state.settle(
                child,
                Settlement::Rejected(
                    Error::new(ErrorKind::AllFailed)
                        .with_context("no branches to race")
                        .with_source(AllFailed::new(Vec::new())),
                ),
            );
        }
        Ok(Deferred::new(state.barrier, child))
    })
}
