//! An in-memory event store, useful for testing and development.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Condvar, Mutex, RawMutex};
use tracing::{debug, instrument, warn};

use crate::{ConflictDetection, Error, Event, EventHandler, EventStore, Result};

// Type aliases to keep complex generic types readable and satisfy clippy::type-complexity.
type EventStream<E> = Arc<Mutex<Vec<E>>>;

/// Thread-safe map keyed by (topic, aggregate_id)
type StoreMap<E> = DashMap<(String, <E as Event>::Id), EventStream<E>>;

type StreamGuard<E> = ArcMutexGuard<RawMutex, Vec<E>>;

type HandlerMap<E> = DashMap<String, Vec<Arc<dyn EventHandler<E>>>>;

/// Hands out delivery turns so that a topic's batches reach its handlers in
/// the order they were stored, one batch at a time.
#[derive(Default)]
struct DeliveryOrder {
    turns: Mutex<Turns>,
    advanced: Condvar,
}

#[derive(Default)]
struct Turns {
    issued: u64,
    delivered: u64,
}

impl DeliveryOrder {
    /// Must be called while the batch's stream locks are held.
    fn issue(&self) -> u64 {
        let mut turns = self.turns.lock();
        let ticket = turns.issued;
        turns.issued += 1;
        ticket
    }

    fn wait_for(&self, ticket: u64) -> Turn<'_> {
        let mut turns = self.turns.lock();
        while turns.delivered != ticket {
            self.advanced.wait(&mut turns);
        }
        Turn { order: self }
    }
}

/// Passes delivery on to the next batch when dropped, including while a
/// handler panic unwinds.
struct Turn<'a> {
    order: &'a DeliveryOrder,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.order.turns.lock().delivered += 1;
        self.order.advanced.notify_all();
    }
}

/// An in-memory, thread-safe event store.
///
/// Each aggregate stream sits behind its own lock, so appends to one stream
/// are linearized while appends to different streams proceed independently.
/// The store owns all of its state; dropping it drops every stream and
/// handler.
///
/// Events of one stream reach handlers in the order they were stored, even
/// when appends race. Handlers may read the store, but a handler that
/// appends to the topic it is registered on deadlocks: its append waits for
/// the delivery that is running it.
pub struct InMemoryEventStore<E: Event> {
    streams: StoreMap<E>,
    handlers: HandlerMap<E>,
    delivery: DashMap<String, Arc<DeliveryOrder>>,
    conflict_detection: ConflictDetection,
}

impl<E: Event> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self {
            streams: DashMap::new(),
            handlers: DashMap::new(),
            delivery: DashMap::new(),
            conflict_detection: ConflictDetection::default(),
        }
    }
}

impl<E: Event> InMemoryEventStore<E> {
    /// Creates an empty store with lazy conflict detection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets when expected versions are checked against stored streams.
    pub fn with_conflict_detection(mut self, conflict_detection: ConflictDetection) -> Self {
        self.conflict_detection = conflict_detection;
        self
    }

    /// Returns the configured conflict detection mode.
    pub fn conflict_detection(&self) -> ConflictDetection {
        self.conflict_detection
    }

    fn stream(&self, topic: &str, id: &E::Id) -> Option<EventStream<E>> {
        self.streams
            .get(&(topic.to_string(), id.clone()))
            .map(|stream| Arc::clone(&stream))
    }

    fn stream_or_default(&self, topic: &str, id: &E::Id) -> EventStream<E> {
        let stream = self
            .streams
            .entry((topic.to_string(), id.clone()))
            .or_default();
        Arc::clone(&stream)
    }

    // Locks are taken in id order so concurrent batches cannot deadlock. A
    // rejected batch may unlink a stream it created, so each locked stream
    // is checked to still be the one in the map before it is used.
    fn lock_streams(&self, topic: &str, ids: &[E::Id]) -> Vec<StreamGuard<E>> {
        loop {
            let guards: Vec<StreamGuard<E>> = ids
                .iter()
                .map(|id| self.stream_or_default(topic, id).lock_arc())
                .collect();
            let linked = ids.iter().zip(&guards).all(|(id, guard)| {
                self.stream(topic, id)
                    .is_some_and(|stream| Arc::ptr_eq(&stream, ArcMutexGuard::mutex(guard)))
            });
            if linked {
                return guards;
            }
        }
    }

    // Called with the batch's stream locks held.
    fn unlink_empty(&self, topic: &str, ids: &[E::Id], guards: &[StreamGuard<E>]) {
        for (id, guard) in ids.iter().zip(guards) {
            if guard.is_empty() {
                self.streams.remove(&(topic.to_string(), id.clone()));
            }
        }
    }

    fn delivery_order(&self, topic: &str) -> Arc<DeliveryOrder> {
        let order = self.delivery.entry(topic.to_string()).or_default();
        Arc::clone(&order)
    }

    // The handler list is cloned out so no map guard is held while handlers
    // run; a handler may register further handlers or read the store.
    fn notify(&self, topic: &str, events: &[E]) {
        let handlers = match self.handlers.get(topic) {
            Some(handlers) => handlers.value().clone(),
            None => return,
        };

        for event in events {
            debug!(
                topic,
                event_type = event.event_type(),
                handlers = handlers.len(),
                "notifying handlers"
            );
            for handler in &handlers {
                handler.handle(event);
            }
        }
    }
}

/// Checks that every event continues its stream, given each stream's
/// current length. `ids` is sorted and `lengths` is aligned with it.
fn check_versions<E: Event>(ids: &[E::Id], lengths: &mut [u64], events: &[E]) -> Result<()> {
    for event in events {
        let Ok(index) = ids.binary_search(event.aggregate_id()) else {
            return Err(Error::Store(format!(
                "no stream locked for aggregate {}",
                event.aggregate_id()
            )));
        };
        let actual = lengths[index];
        if event.expected_version() != actual + 1 {
            return Err(Error::VersionConflict {
                aggregate_id: event.aggregate_id().to_string(),
                expected: event.expected_version(),
                actual,
            });
        }
        lengths[index] = actual + 1;
    }
    Ok(())
}

#[async_trait]
impl<E> EventStore<E> for InMemoryEventStore<E>
where
    E: Event,
{
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn add_all(&self, topic: &str, events: Vec<E>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut ids: Vec<E::Id> = events.iter().map(|e| e.aggregate_id().clone()).collect();
        ids.sort();
        ids.dedup();

        let order = self.delivery_order(topic);
        let ticket = {
            let mut guards = self.lock_streams(topic, &ids);

            if self.conflict_detection == ConflictDetection::Eager {
                let mut lengths: Vec<u64> = guards.iter().map(|g| g.len() as u64).collect();
                if let Err(err) = check_versions(&ids, &mut lengths, &events) {
                    self.unlink_empty(topic, &ids, &guards);
                    warn!(topic, error = %err, "rejected stale append");
                    return Err(err);
                }
            }

            for event in &events {
                if let Ok(index) = ids.binary_search(event.aggregate_id()) {
                    guards[index].push(event.clone());
                }
            }
            order.issue()
        };

        debug!(topic, count = events.len(), ticket, "appended events");
        let _turn = order.wait_for(ticket);
        self.notify(topic, &events);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, topic: &str, id: &E::Id) -> Result<Vec<E>> {
        Ok(self
            .stream(topic, id)
            .map(|stream| stream.lock().clone())
            .unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn exists(&self, topic: &str, id: &E::Id) -> Result<bool> {
        Ok(self
            .stream(topic, id)
            .is_some_and(|stream| !stream.lock().is_empty()))
    }

    fn register(&self, topic: &str, handler: Arc<dyn EventHandler<E>>) {
        debug!(topic, "registering handler");
        self.handlers
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }
}
