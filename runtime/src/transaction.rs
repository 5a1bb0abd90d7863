//! The unit of work of one command.
//!
//! A [`Transaction`] collects everything a command produces: domain events (already
//! folded into the working copy of the entity), debug trace lines, timer actions
//! and commands for other entities. Nothing leaves the transaction until the
//! events are persisted; on any failure the whole transaction is dropped.

use crate::entity::ModelEntity;
use casework_core::codec::MessageCodec;
use casework_core::entity::EntityId;
use casework_core::error::CommandError;
use casework_core::event::EventMetadata;
use casework_core::message::{CommandEnvelope, EncodedMessage, MessageId, UserIdentity};
use casework_core::response::ModelResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Continuation run when the answer to an outgoing command arrives.
pub type ResponseCallback<E> = Box<
    dyn FnOnce(&mut E, &ModelResponse, &mut Transaction<E>) -> Result<(), CommandError> + Send,
>;

/// Who, when and where of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandMeta {
    /// Message id of the triggering command, or a fresh id for responses and timers.
    pub message_id: MessageId,
    /// Entity handling the command.
    pub entity_id: EntityId,
    /// Entity type handling the command.
    pub entity_type: &'static str,
    /// Tenant the command runs in.
    pub tenant: String,
    /// Acting user.
    pub user: UserIdentity,
    /// Transaction timestamp, shared by all events.
    pub timestamp: DateTime<Utc>,
}

impl CommandMeta {
    /// Event metadata for events of this transaction.
    #[must_use]
    pub fn event_metadata(&self) -> EventMetadata {
        EventMetadata {
            entity_id: self.entity_id.clone(),
            entity_type: self.entity_type.to_string(),
            tenant: self.tenant.clone(),
            user_id: self.user.id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// A timer change requested by entity code.
#[derive(Clone, Debug)]
pub enum TimerAction<C> {
    /// Deliver `command` to the entity itself after `after`.
    Schedule {
        /// Timer key, unique within the entity.
        key: String,
        /// Delay.
        after: Duration,
        /// Command to deliver.
        command: C,
        /// User the command runs as.
        user: UserIdentity,
    },
    /// Cancel the timer with this key.
    Cancel {
        /// Timer key.
        key: String,
    },
}

/// A command sent to another entity, with its continuations.
pub struct OutgoingAsk<E: ModelEntity> {
    /// Target entity type.
    pub target_type: String,
    /// The encoded command.
    pub envelope: CommandEnvelope<EncodedMessage>,
    /// Runs on a success response.
    pub on_success: ResponseCallback<E>,
    /// Runs on a failure response.
    pub on_failure: ResponseCallback<E>,
}

impl<E: ModelEntity> fmt::Debug for OutgoingAsk<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingAsk")
            .field("target_type", &self.target_type)
            .field("target", &self.envelope.entity_id)
            .field("manifest", &self.envelope.command.manifest)
            .finish_non_exhaustive()
    }
}

/// Everything a transaction produced, handed back to the pipeline.
pub(crate) struct TransactionParts<E: ModelEntity> {
    pub meta: CommandMeta,
    pub events: Vec<E::Event>,
    pub debug: Vec<String>,
    pub timers: Vec<TimerAction<E::Command>>,
    pub asks: Vec<OutgoingAsk<E>>,
}

/// Unit of work of one command against one entity.
pub struct Transaction<E: ModelEntity> {
    meta: CommandMeta,
    settings: Arc<E::Settings>,
    codec: Arc<MessageCodec>,
    events: Vec<E::Event>,
    debug: Vec<String>,
    timers: Vec<TimerAction<E::Command>>,
    asks: Vec<OutgoingAsk<E>>,
}

impl<E: ModelEntity> Transaction<E> {
    /// Open a transaction.
    #[must_use]
    pub const fn new(meta: CommandMeta, settings: Arc<E::Settings>, codec: Arc<MessageCodec>) -> Self {
        Self {
            meta,
            settings,
            codec,
            events: Vec::new(),
            debug: Vec::new(),
            timers: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Who, when and where.
    #[must_use]
    pub const fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    /// Acting user.
    #[must_use]
    pub const fn user(&self) -> &UserIdentity {
        &self.meta.user
    }

    /// Transaction timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.meta.timestamp
    }

    /// Entity type settings.
    #[must_use]
    pub fn settings(&self) -> &E::Settings {
        &self.settings
    }

    /// Fold `event` into `entity` and record it.
    ///
    /// # Errors
    ///
    /// `Internal` if the event does not fit the state.
    pub fn add_event(&mut self, entity: &mut E, event: E::Event) -> Result<(), CommandError> {
        entity.apply(&event, &self.meta.event_metadata())?;
        self.events.push(event);
        Ok(())
    }

    /// Events added so far, in order.
    #[must_use]
    pub fn events(&self) -> &[E::Event] {
        &self.events
    }

    /// Record a debug trace line.
    pub fn debug(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(entity_id = %self.meta.entity_id, "{line}");
        self.debug.push(line);
    }

    /// Deliver `command` to this entity after `after`, as the current user.
    ///
    /// Scheduling under an existing key replaces the pending timer.
    pub fn schedule_timer(&mut self, key: impl Into<String>, after: Duration, command: E::Command) {
        self.timers.push(TimerAction::Schedule {
            key: key.into(),
            after,
            command,
            user: self.meta.user.clone(),
        });
    }

    /// Cancel the timer with `key`, if any.
    pub fn cancel_timer(&mut self, key: impl Into<String>) {
        self.timers.push(TimerAction::Cancel { key: key.into() });
    }

    /// Send `command` to another entity once this transaction is persisted.
    ///
    /// Exactly one of the callbacks runs when the response arrives, inside a
    /// transaction of its own.
    ///
    /// # Errors
    ///
    /// `Internal` if the command cannot be encoded.
    pub fn ask<C, S, F>(
        &mut self,
        target_type: &str,
        target: EntityId,
        command: &C,
        on_success: S,
        on_failure: F,
    ) -> Result<MessageId, CommandError>
    where
        C: Serialize,
        S: FnOnce(&mut E, &ModelResponse, &mut Self) -> Result<(), CommandError> + Send + 'static,
        F: FnOnce(&mut E, &ModelResponse, &mut Self) -> Result<(), CommandError> + Send + 'static,
    {
        let encoded = self
            .codec
            .encode_command(target_type, command)
            .map_err(|e| CommandError::Internal(e.to_string()))?;
        let envelope = CommandEnvelope::new(target, self.meta.user.clone(), encoded);
        let message_id = envelope.message_id;
        self.asks.push(OutgoingAsk {
            target_type: target_type.to_string(),
            envelope,
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        });
        Ok(message_id)
    }

    pub(crate) fn into_parts(self) -> TransactionParts<E> {
        TransactionParts {
            meta: self.meta,
            events: self.events,
            debug: self.debug,
            timers: self.timers,
            asks: self.asks,
        }
    }
}

impl<E: ModelEntity> fmt::Debug for Transaction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("meta", &self.meta)
            .field("events", &self.events.len())
            .field("timers", &self.timers.len())
            .field("asks", &self.asks)
            .finish_non_exhaustive()
    }
}
