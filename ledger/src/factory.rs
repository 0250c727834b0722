//! Rebuilds aggregates from their event history.
use std::marker::PhantomData;

use crate::{Aggregate, Result};

/// Folds events into aggregates of kind `A`.
///
/// Both operations are pure: the same history always produces the same
/// aggregate, and nothing is retained between calls.
pub struct Factory<A>(PhantomData<A>);

impl<A: Aggregate> Factory<A> {
    /// Reconstructs an aggregate by applying its full history to
    /// [`Aggregate::nil`].
    ///
    /// Fails with [`Error::VersionConflict`](crate::Error::VersionConflict)
    /// if the history has gaps, duplicates, or is out of order.
    pub fn replay<'a, I>(events: I) -> Result<A>
    where
        I: IntoIterator<Item = &'a A::Event>,
    {
        Self::apply(A::nil(), events)
    }

    /// Advances an already materialized aggregate by further events.
    pub fn apply<'a, I>(aggregate: A, events: I) -> Result<A>
    where
        I: IntoIterator<Item = &'a A::Event>,
    {
        events
            .into_iter()
            .try_fold(aggregate, |aggregate, event| aggregate.apply(event))
    }
}
