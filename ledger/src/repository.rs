//! Provides a generic repository for interacting with aggregate histories.
use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{Aggregate, Error, Event, EventStore, Result};

/// Defines the standard interface for a repository.
///
/// Unlike an [`EventStore`], a repository treats a missing history as an
/// error: [`get`](Repository::get) fails with [`Error::DoesNotExist`].
#[async_trait]
pub trait Repository<A: Aggregate>: Send + Sync {
    /// Persists new events, in order, as one all-or-nothing batch.
    async fn add(&self, events: Vec<A::Event>) -> Result<()>;
    /// Loads the full history of an aggregate.
    async fn get(&self, id: &A::Id) -> Result<Vec<A::Event>>;
    /// Returns whether the aggregate has any history.
    async fn exists(&self, id: &A::Id) -> Result<bool>;
}

/// A repository over any [`EventStore`], scoped to the aggregate's topic.
pub struct GenericRepository<A, S>
where
    A: Aggregate,
    S: EventStore<A::Event>,
{
    store: Arc<S>,
    _phantom: PhantomData<A>,
}

impl<A, S> GenericRepository<A, S>
where
    A: Aggregate,
    S: EventStore<A::Event>,
{
    /// Creates a new `GenericRepository`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<A, S> Repository<A> for GenericRepository<A, S>
where
    A: Aggregate,
    S: EventStore<A::Event> + 'static,
{
    #[instrument(skip(self, events), fields(topic = A::TOPIC, count = events.len()))]
    async fn add(&self, events: Vec<A::Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        for event in &events {
            debug!(
                aggregate.id = %event.aggregate_id(),
                expected_version = event.expected_version(),
                event_type = event.event_type(),
                "adding event"
            );
        }
        self.store.add_all(A::TOPIC, events).await
    }

    #[instrument(skip(self), fields(topic = A::TOPIC, aggregate.id = %id))]
    async fn get(&self, id: &A::Id) -> Result<Vec<A::Event>> {
        let events = self.store.get(A::TOPIC, id).await?;

        // Guard against loading a non-existing aggregate.
        if events.is_empty() {
            return Err(Error::DoesNotExist(format!("{} {id}", A::TOPIC)));
        }

        Ok(events)
    }

    #[instrument(skip(self), fields(topic = A::TOPIC, aggregate.id = %id))]
    async fn exists(&self, id: &A::Id) -> Result<bool> {
        self.store.exists(A::TOPIC, id).await
    }
}

#[async_trait]
impl<A, R> Repository<A> for Arc<R>
where
    A: Aggregate,
    R: Repository<A> + Send + Sync,
{
    async fn add(&self, events: Vec<A::Event>) -> Result<()> {
        (**self).add(events).await
    }

    async fn get(&self, id: &A::Id) -> Result<Vec<A::Event>> {
        (**self).get(id).await
    }

    async fn exists(&self, id: &A::Id) -> Result<bool> {
        (**self).exists(id).await
    }
}
