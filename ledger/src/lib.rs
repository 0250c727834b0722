//! # Event-Sourced Ledger
//!
//! `ledger` keeps account balances as a fold over immutable domain events.
//! Nothing but events is ever persisted: an account's current state is
//! rebuilt by replaying its history from the nil account.
//!
//! ## Core Concepts
//!
//! - **[`Event`]**: An immutable fact about one aggregate, stamped with the
//!   version it expects to produce when applied.
//! - **[`Aggregate`]**: State that is only ever advanced by applying events.
//!   [`Aggregate::apply`] enforces the optimistic-versioning protocol.
//! - **[`Factory`]**: Replays a history into an aggregate.
//! - **[`EventStore`]**: Append-only storage partitioned by topic and
//!   aggregate id, with synchronous topic subscriptions.
//! - **[`Repository`](repository::Repository)**: Aggregate-shaped view over
//!   an event store.
//! - **[`AccountService`](service::AccountService)**: Business operations
//!   (create, credit, debit, transfer).
//!
//! ## Example
//!
//! ```rust
//! use ledger::{Ledger, LedgerConfig, AccountFactory};
//! use rust_decimal::Decimal;
//! use uuid::Uuid;
//!
//! # futures::executor::block_on(async {
//! let ledger = Ledger::new(&LedgerConfig::default());
//! let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
//!
//! ledger.service().create(alice).await?;
//! ledger.service().create(bob).await?;
//! ledger.service().credit(alice, "salary", Decimal::from(10)).await?;
//! ledger.service().transfer(alice, bob, "rent", Decimal::from(3)).await?;
//!
//! let account = ledger.service().account(alice).await?;
//! assert_eq!(account.balance(), Decimal::from(7));
//! assert_eq!(ledger.read_model().get(&bob)?.balance, Decimal::from(3));
//! # Ok::<(), ledger::Error>(())
//! # }).unwrap();
//! ```
#![deny(missing_docs)]

// Lets `#[derive(EventPayload)]` refer to `::ledger` from inside this crate.
extern crate self as ledger;

use std::{fmt::Debug, sync::Arc};

pub use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

pub mod account;
#[cfg(feature = "in-memory")]
pub mod bootstrap;
pub mod config;
pub mod factory;
pub mod read_model;
pub mod repository;
pub mod service;
pub mod store;

pub use account::{Account, AccountChange, AccountEvent, AccountFactory};
#[cfg(feature = "in-memory")]
pub use bootstrap::Ledger;
pub use config::{ConflictDetection, LedgerConfig};
pub use factory::Factory;
pub use ledger_derive::EventPayload;

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum Error {
    /// An event was applied to an aggregate whose version is not exactly one
    /// below the event's expected version. Raised during replay, or at append
    /// time when the store runs with [`ConflictDetection::Eager`].
    #[error(
        "version conflict on aggregate {aggregate_id}: event expects version {expected}, aggregate is at version {actual}"
    )]
    VersionConflict {
        /// The aggregate whose history is inconsistent.
        aggregate_id: String,
        /// The version the offending event expected to produce.
        expected: u64,
        /// The version the aggregate was actually at.
        actual: u64,
    },
    /// The repository holds no events for the requested aggregate.
    #[error("no events for {0}")]
    DoesNotExist(String),
    /// An account with this id already has history.
    #[error("account {0} already exists")]
    AccountAlreadyExists(Uuid),
    /// An operation targeted an account with no history.
    #[error("account {0} not found")]
    AccountNotFound(Uuid),
    /// A debit would take the balance below zero while overdrafts are
    /// disabled.
    #[error("insufficient funds in account {account_id}: balance {balance}, requested {amount}")]
    InsufficientFunds {
        /// The account being debited.
        account_id: Uuid,
        /// Its balance at the time of the request.
        balance: Decimal,
        /// The requested debit.
        amount: Decimal,
    },
    /// Occurs when a command fails a validation rule.
    #[error("validation error: {0}")]
    Validation(String),
    /// The ledger configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// Wraps an error from the underlying event store.
    #[error("event store error: {0}")]
    Store(String),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Uniquely identifies an aggregate instance.
///
/// `Ord` is required so that stores can lock several streams in a fixed
/// order.
pub trait AggregateId:
    Eq + Ord + std::hash::Hash + Clone + Send + Sync + Debug + std::fmt::Display + 'static
{
    /// Creates a new, unique aggregate ID.
    fn new() -> Self;
}

impl AggregateId for Uuid {
    fn new() -> Self {
        Uuid::new_v4()
    }
}

/// Names the kind of an event payload.
///
/// Use `#[derive(EventPayload)]` on the payload enum rather than implementing
/// this by hand.
pub trait EventPayload {
    /// Returns a static string slice naming the payload variant.
    fn event_type(&self) -> &'static str;
}

/// An immutable fact about a single aggregate instance.
pub trait Event: Clone + Debug + Send + Sync + 'static {
    /// The identifier type of the aggregate this event belongs to.
    type Id: AggregateId;

    /// Returns the aggregate this event belongs to.
    fn aggregate_id(&self) -> &Self::Id;

    /// The version the aggregate will be at once this event is applied.
    ///
    /// Producers stamp this as their currently known version plus one.
    fn expected_version(&self) -> u64;

    /// Returns a static string slice representing the type of the event.
    fn event_type(&self) -> &'static str;
}

/// An entity whose state is derived by folding its event history.
///
/// Aggregates have value semantics: [`apply`](Aggregate::apply) never touches
/// `self` and returns a new value instead.
pub trait Aggregate: Clone + Debug + Send + Sync + 'static {
    /// The type of the aggregate's unique identifier.
    type Id: AggregateId;
    /// The type of events that this aggregate is built from.
    type Event: Event<Id = Self::Id>;

    /// The store topic that holds this aggregate kind's streams.
    const TOPIC: &'static str;

    /// The unversioned, id-less seed that every replay starts from.
    fn nil() -> Self;

    /// Returns the identifier, or `None` for the nil aggregate.
    fn id(&self) -> Option<&Self::Id>;

    /// Returns the number of events applied since creation.
    fn version(&self) -> u64;

    /// Overwrites the version. Only [`apply`](Aggregate::apply) calls this.
    fn set_version(&mut self, version: u64);

    /// Performs the event-specific part of a state transition.
    ///
    /// Implementations must not read the event's expected version or touch
    /// the aggregate's version.
    fn apply_changes(&mut self, event: &Self::Event);

    /// Applies an event, producing the next aggregate value.
    ///
    /// Fails with [`Error::VersionConflict`] unless the event expects exactly
    /// `self.version() + 1`; `self` is left as it was either way.
    fn apply(&self, event: &Self::Event) -> Result<Self> {
        let actual = self.version();
        let expected = event.expected_version();
        if expected != actual + 1 {
            return Err(Error::VersionConflict {
                aggregate_id: event.aggregate_id().to_string(),
                expected,
                actual,
            });
        }

        let mut next = self.clone();
        next.apply_changes(event);
        next.set_version(actual + 1);
        Ok(next)
    }
}

/// Receives every event appended to the topic it is registered on.
///
/// Handlers run synchronously on the appending task, after the batch is
/// stored. Any panic propagates to the caller of [`EventStore::add`], and
/// handlers registered after the panicking one do not see that event.
///
/// A handler may read the store it is registered on. It must not append to
/// its own topic: per topic, deliveries are serialized in storage order, so
/// the nested append would wait on the delivery that is running it.
pub trait EventHandler<E>: Send + Sync {
    /// Handles one freshly appended event.
    fn handle(&self, event: &E);
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn handle(&self, event: &E) {
        self(event)
    }
}

/// The trait for event stores.
#[async_trait]
pub trait EventStore<E: Event>: Send + Sync {
    /// Appends a batch of events and then notifies the topic's handlers.
    ///
    /// The batch is all-or-nothing, even when it spans several aggregates.
    /// Within one aggregate, events are stored in the order given. Handlers
    /// are called once per event, in event order, in registration order.
    async fn add_all(&self, topic: &str, events: Vec<E>) -> Result<()>;

    /// Returns the ordered history of one aggregate within a topic.
    ///
    /// An unknown aggregate yields an empty history, not an error.
    async fn get(&self, topic: &str, id: &E::Id) -> Result<Vec<E>>;

    /// Returns whether any event is stored for the aggregate within a topic.
    async fn exists(&self, topic: &str, id: &E::Id) -> Result<bool>;

    /// Subscribes a handler to all future appends on a topic.
    ///
    /// Events stored before registration are not delivered.
    fn register(&self, topic: &str, handler: Arc<dyn EventHandler<E>>);

    /// Appends a single event and then notifies the topic's handlers.
    async fn add(&self, topic: &str, event: E) -> Result<()> {
        self.add_all(topic, vec![event]).await
    }
}
