//! Event store trait and related types.
//!
//! The event store is the durable, append-only, per-entity ordered log every
//! entity is rebuilt from. It is shared by all entity contexts of a process and
//! must be safe for concurrent use.
//!
//! # Contract
//!
//! - Appends are atomic per call: either every event of the batch is stored or none.
//! - Sequence numbers are assigned by the store, start at 1 and are gapless per entity.
//! - `expected` implements optimistic concurrency: the append fails if the
//!   entity's current sequence number differs.
//!
//! # Example
//!
//! ```no_run
//! use casework_core::entity::{EntityId, SequenceNr};
//! use casework_core::event_store::{EventStore, EventStoreError};
//!
//! async fn example(store: &dyn EventStore) -> Result<(), EventStoreError> {
//!     let id = EntityId::new("case-123");
//!     let history = store.load_events(id.clone(), None).await?;
//!     let last = history.last().map_or(SequenceNr::INITIAL, |e| e.sequence_nr);
//!
//!     let new_last = store.append_events(id, Some(last), vec![/* ... */]).await?;
//!     assert!(new_last >= last);
//!     Ok(())
//! }
//! ```

use crate::entity::{EntityId, SequenceNr};
use crate::event::StoredEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Type alias for snapshot data: `(SequenceNr, Vec<u8>)`
type SnapshotData = (SequenceNr, Vec<u8>);

/// Boxed future returned by [`EventStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventStoreError>> + Send + 'a>>;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: expected sequence number doesn't match.
    #[error("Concurrency conflict on {entity_id}: expected sequence {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The entity where the conflict occurred.
        entity_id: EntityId,
        /// The sequence number the writer expected.
        expected: SequenceNr,
        /// The actual current sequence number.
        actual: SequenceNr,
    },

    /// Stream not found in the event store.
    #[error("Stream not found: {0}")]
    StreamNotFound(EntityId),

    /// Database connection error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// An event as read back from the store, with its assigned position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedEvent {
    /// Position in the entity's log.
    pub sequence_nr: SequenceNr,
    /// The stored event.
    pub event: StoredEvent,
}

/// Event store abstraction for appending and replaying entity logs.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the store can be
/// shared as `Arc<dyn EventStore>` by every entity context.
pub trait EventStore: Send + Sync {
    /// Append events to an entity's log.
    ///
    /// Returns the sequence number of the last appended event (or the current
    /// one when `events` is empty).
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: `expected` does not match the current sequence number
    /// - `DatabaseError` / `IoError`: the store could not write
    fn append_events(
        &self,
        entity_id: EntityId,
        expected: Option<SequenceNr>,
        events: Vec<StoredEvent>,
    ) -> StoreFuture<'_, SequenceNr>;

    /// Load events of an entity, oldest first.
    ///
    /// `from`: first sequence number to return (inclusive), `None` for all.
    /// Unknown entities yield an empty vector.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `IoError`: the store could not read
    fn load_events(
        &self,
        entity_id: EntityId,
        from: Option<SequenceNr>,
    ) -> StoreFuture<'_, Vec<PersistedEvent>>;

    /// Save a snapshot of entity state taken after `sequence_nr`.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the store could not write
    fn save_snapshot(
        &self,
        entity_id: EntityId,
        sequence_nr: SequenceNr,
        state: Vec<u8>,
    ) -> StoreFuture<'_, ()>;

    /// Load the latest snapshot of an entity, if any.
    ///
    /// Events after the returned sequence number still have to be replayed.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the store could not read
    fn load_snapshot(&self, entity_id: EntityId) -> StoreFuture<'_, Option<SnapshotData>>;
}
