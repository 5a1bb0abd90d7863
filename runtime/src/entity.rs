//! The contract every hosted entity type implements.
//!
//! An entity is plain data plus three kinds of logic:
//!
//! - `validate` checks a command against the current state without mutating it,
//! - `execute` performs the command, adding events through the [`Transaction`],
//! - `apply` folds one event into the state. It must be a pure function of
//!   state and event, since recovery rebuilds the entity by calling it for every
//!   historical event.
//!
//! The runtime wraps the entity in an [`EntityState`] together with the
//! bookkeeping it maintains itself ([`EntityMeta`]).

use crate::transaction::Transaction;
use casework_core::codec::ManifestSpec;
use casework_core::entity::{EntityId, SequenceNr};
use casework_core::error::{ApplyError, CommandError};
use casework_core::event::{EventMetadata, ModelEvent};
use casework_core::message::ModelCommand;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An event-sourced entity type hosted by the runtime.
pub trait ModelEntity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the entity type; used for routing and stamped into event metadata.
    const ENTITY_TYPE: &'static str;

    /// Manifests of the entity's commands.
    const COMMAND_MANIFESTS: &'static [ManifestSpec];

    /// Manifests of the entity's domain events.
    const EVENT_MANIFESTS: &'static [ManifestSpec];

    /// Commands the entity accepts.
    type Command: ModelCommand;

    /// Domain events the entity produces.
    type Event: ModelEvent;

    /// Per entity type settings shared by every instance.
    type Settings: Clone + Default + fmt::Debug + Send + Sync + 'static;

    /// A blank instance, before any event.
    fn create(id: &EntityId) -> Self;

    /// Whether this instance can handle the command in its current configuration.
    ///
    /// Unsupported commands are rejected with a routing failure.
    fn supports(&self, _command: &Self::Command) -> bool {
        true
    }

    /// Check the command against the current state.
    ///
    /// # Errors
    ///
    /// `Unauthorized` or `Invalid` for expected refusals, `Internal` for anything else.
    fn validate(&self, command: &Self::Command, tx: &Transaction<Self>) -> Result<(), CommandError>;

    /// Perform the command, adding events through the transaction.
    ///
    /// Returns the entity specific reply value.
    ///
    /// # Errors
    ///
    /// Any [`CommandError`]; the working copy is discarded.
    fn execute(
        &mut self,
        command: Self::Command,
        tx: &mut Transaction<Self>,
    ) -> Result<serde_json::Value, CommandError>;

    /// Fold an event into the state.
    ///
    /// # Errors
    ///
    /// [`ApplyError`] if the event does not fit the state.
    fn apply(&mut self, event: &Self::Event, metadata: &EventMetadata) -> Result<(), ApplyError>;

    /// Runs once after the last historical event was replayed.
    ///
    /// Live-only bookkeeping (re-arming timers) belongs here.
    fn recovery_completed(&mut self, _tx: &mut Transaction<Self>) {}
}

/// Runtime bookkeeping of an entity instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Entity id.
    pub id: EntityId,
    /// Tenant, known after the first event.
    pub tenant: Option<String>,
    /// Sequence number of the last applied event.
    pub sequence_nr: SequenceNr,
    /// Stamp of the last commit event.
    pub last_modified: Option<DateTime<Utc>>,
    /// Engine version recorded in the history.
    pub engine_version: Option<String>,
}

impl EntityMeta {
    /// Metadata of a blank entity.
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self {
            id,
            tenant: None,
            sequence_nr: SequenceNr::INITIAL,
            last_modified: None,
            engine_version: None,
        }
    }
}

/// An entity together with its runtime bookkeeping.
///
/// Serialized as a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "E: Serialize", deserialize = "E: DeserializeOwned"))]
pub struct EntityState<E> {
    /// The entity.
    pub entity: E,
    /// Runtime bookkeeping.
    pub meta: EntityMeta,
}

impl<E: ModelEntity> EntityState<E> {
    /// A blank entity.
    #[must_use]
    pub fn blank(id: EntityId) -> Self {
        Self {
            entity: E::create(&id),
            meta: EntityMeta::new(id),
        }
    }
}
