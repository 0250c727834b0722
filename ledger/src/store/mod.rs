//! The store module contains the implementations of the event store.
//!
//! Any type implementing [`EventStore`](crate::EventStore) can back a
//! [`GenericRepository`](crate::repository::GenericRepository).

// The in-memory implementation is compiled when the `in-memory` feature is
// enabled (this is the default).
#[cfg(feature = "in-memory")]
/// An in-memory event store.
pub mod in_memory;
