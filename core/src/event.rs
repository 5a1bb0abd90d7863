//! Events and their stored form.
//!
//! Events are immutable facts. An entity's events fall in two groups:
//!
//! - **Domain events** ([`ModelEvent`]), defined per entity type and folded into
//!   entity state.
//! - **Runtime events** ([`RuntimeEvent`]), written by the engine itself: the
//!   commit marker that closes a command's handling and stamps last-modified,
//!   the engine version marker, and debug traces.
//!
//! Both travel to the event store as [`StoredEvent`]s: a manifest tag, a JSON
//! payload and the [`EventMetadata`] shared by every event of one command.
//!
//! # Example
//!
//! ```
//! use casework_core::event::{EntityEvent, ModelEvent, RuntimeEvent};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum GroupEvent {
//!     MemberAdded { user_id: String },
//! }
//!
//! impl ModelEvent for GroupEvent {}
//!
//! let event: EntityEvent<GroupEvent> = EntityEvent::Domain(GroupEvent::MemberAdded {
//!     user_id: "alice".to_string(),
//! });
//! assert!(event.is_stateful());
//! assert!(!EntityEvent::<GroupEvent>::Runtime(RuntimeEvent::Debug { messages: vec![] }).is_stateful());
//! ```

use crate::entity::EntityId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A domain event of one entity type.
///
/// Domain events are serialized with serde's externally tagged enum
/// representation; the variant name is the event's manifest name.
pub trait ModelEvent: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Short human readable description used in logs.
    fn description(&self) -> String {
        format!("{self:?}")
    }
}

/// Metadata shared by all events produced while handling one command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Entity the event belongs to.
    pub entity_id: EntityId,
    /// Entity type that produced the event.
    pub entity_type: String,
    /// Tenant of the entity.
    pub tenant: String,
    /// Id of the acting user.
    pub user_id: String,
    /// Transaction timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Events written by the engine rather than by entity code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// Commit marker: handling of the command is finished.
    EntityModified {
        /// New last-modified stamp of the entity.
        last_modified: DateTime<Utc>,
    },
    /// The engine version handling this entity differs from the one that wrote its history.
    EngineVersionChanged {
        /// Version now in use.
        version: String,
    },
    /// Debug trace lines captured while handling a command.
    Debug {
        /// Trace lines, in order.
        messages: Vec<String>,
    },
}

impl RuntimeEvent {
    /// Manifest names of all runtime events.
    pub const MANIFESTS: [&'static str; 3] = ["EntityModified", "EngineVersionChanged", "Debug"];
}

/// Manifests written by the external archival and deletion protocol.
///
/// Observing one of these during replay moves the entity into storage mode.
pub const STORAGE_PROTOCOL_MANIFESTS: [&str; 2] =
    ["StorageArchivingStarted", "StorageDeletionStarted"];

/// One event in an entity's log: domain or runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityEvent<E> {
    /// Domain event of the entity type.
    Domain(E),
    /// Engine event.
    Runtime(RuntimeEvent),
}

impl<E> EntityEvent<E> {
    /// Whether this is the commit marker.
    #[must_use]
    pub const fn is_commit(&self) -> bool {
        matches!(self, Self::Runtime(RuntimeEvent::EntityModified { .. }))
    }

    /// Whether folding this event changes entity state.
    ///
    /// Debug traces are the only events that do not.
    #[must_use]
    pub const fn is_stateful(&self) -> bool {
        !matches!(self, Self::Runtime(RuntimeEvent::Debug { .. }))
    }
}

/// An event in its stored form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    /// Manifest tag, `Name` or `Name;version`.
    pub manifest: String,
    /// JSON payload bytes.
    pub payload: Vec<u8>,
    /// Metadata of the producing command.
    pub metadata: EventMetadata,
}

impl fmt::Display for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoredEvent {{ manifest: {}, entity: {}, size: {} bytes }}",
            self.manifest,
            self.metadata.entity_id,
            self.payload.len()
        )
    }
}
