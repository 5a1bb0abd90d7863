//! In-memory event store for tests.

use casework_core::entity::{EntityId, SequenceNr};
use casework_core::event::StoredEvent;
use casework_core::event_store::{EventStore, EventStoreError, PersistedEvent, StoreFuture};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<EntityId, Vec<StoredEvent>>,
    snapshots: HashMap<EntityId, (SequenceNr, Vec<u8>)>,
    failures: Vec<EventStoreError>,
    appends: usize,
}

/// Event store keeping every stream in memory.
///
/// Supports failure injection and raw writes, so tests can provoke persistence
/// failures and corrupt histories.
///
/// # Example
///
/// ```
/// use casework_testing::InMemoryEventStore;
/// use casework_core::event_store::{EventStore, EventStoreError};
/// use casework_core::entity::{EntityId, SequenceNr};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryEventStore::new();
/// store.fail_next_append(EventStoreError::DatabaseError("disk full".into())).await;
///
/// let result = store.append_events(EntityId::new("x"), Some(SequenceNr::INITIAL), vec![]).await;
/// assert!(result.is_err());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next append fail with `error`. Injected failures queue up.
    pub async fn fail_next_append(&self, error: EventStoreError) {
        self.inner.write().await.failures.push(error);
    }

    /// Append an event without any checks, as another writer would.
    pub async fn insert_raw(&self, entity_id: EntityId, event: StoredEvent) -> SequenceNr {
        let mut inner = self.inner.write().await;
        let stream = inner.streams.entry(entity_id).or_default();
        stream.push(event);
        SequenceNr::new(stream.len() as u64)
    }

    /// All events of a stream.
    pub async fn events(&self, entity_id: &EntityId) -> Vec<StoredEvent> {
        self.inner
            .read()
            .await
            .streams
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Manifests of a stream, in order.
    pub async fn manifests(&self, entity_id: &EntityId) -> Vec<String> {
        self.events(entity_id).await.into_iter().map(|e| e.manifest).collect()
    }

    /// Latest snapshot position of an entity.
    pub async fn snapshot_position(&self, entity_id: &EntityId) -> Option<SequenceNr> {
        self.inner.read().await.snapshots.get(entity_id).map(|(seq, _)| *seq)
    }

    /// Number of successful non-empty appends.
    pub async fn append_count(&self) -> usize {
        self.inner.read().await.appends
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        entity_id: EntityId,
        expected: Option<SequenceNr>,
        events: Vec<StoredEvent>,
    ) -> StoreFuture<'_, SequenceNr> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if !inner.failures.is_empty() {
                return Err(inner.failures.remove(0));
            }

            let stream = inner.streams.entry(entity_id.clone()).or_default();
            let actual = SequenceNr::new(stream.len() as u64);
            if let Some(expected) = expected {
                if expected != actual {
                    return Err(EventStoreError::ConcurrencyConflict {
                        entity_id,
                        expected,
                        actual,
                    });
                }
            }
            if events.is_empty() {
                return Ok(actual);
            }
            stream.extend(events);
            let last = SequenceNr::new(stream.len() as u64);
            inner.appends += 1;
            Ok(last)
        })
    }

    fn load_events(
        &self,
        entity_id: EntityId,
        from: Option<SequenceNr>,
    ) -> StoreFuture<'_, Vec<PersistedEvent>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            let first = from.map_or(1, SequenceNr::value).max(1);
            let events = inner
                .streams
                .get(&entity_id)
                .map(|stream| {
                    stream
                        .iter()
                        .zip(1_u64..)
                        .filter(|(_, n)| *n >= first)
                        .map(|(event, n)| PersistedEvent {
                            sequence_nr: SequenceNr::new(n),
                            event: event.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(events)
        })
    }

    fn save_snapshot(
        &self,
        entity_id: EntityId,
        sequence_nr: SequenceNr,
        state: Vec<u8>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().await.snapshots.insert(entity_id, (sequence_nr, state));
            Ok(())
        })
    }

    fn load_snapshot(&self, entity_id: EntityId) -> StoreFuture<'_, Option<(SequenceNr, Vec<u8>)>> {
        Box::pin(async move { Ok(self.inner.read().await.snapshots.get(&entity_id).cloned()) })
    }
}
