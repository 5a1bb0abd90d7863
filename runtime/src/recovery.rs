//! Recovery by replay.
//!
//! [`RecoveryRoom`] folds an entity's stored history into a blank (or
//! snapshot-restored) [`EntityState`], in log order. Replay stops at the first
//! event that cannot be decoded, belongs to another entity type, fails to fold,
//! or belongs to the archival/deletion protocol; later events are never applied.

use crate::entity::{EntityState, ModelEntity};
use crate::panic_message;
use casework_core::codec::{Decoded, MessageCodec};
use casework_core::entity::SequenceNr;
use casework_core::event::{EntityEvent, EventMetadata, RuntimeEvent};
use casework_core::event_store::PersistedEvent;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;

/// Why recovery aborted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryFailure {
    /// The payload of a registered manifest could not be decoded or migrated.
    #[error("Event {sequence_nr} ({manifest}) cannot be decoded: {reason}")]
    Decode {
        /// Position of the event.
        sequence_nr: SequenceNr,
        /// Stored manifest.
        manifest: String,
        /// Decoder message.
        reason: String,
    },

    /// Nobody registered the manifest.
    #[error("Event {sequence_nr} has unrecognized manifest '{manifest}'")]
    Unrecognized {
        /// Position of the event.
        sequence_nr: SequenceNr,
        /// Stored manifest.
        manifest: String,
    },

    /// The history belongs to another entity type.
    #[error("Event {sequence_nr} ({manifest}) requires an entity of type {required_type}")]
    ForeignEntity {
        /// Position of the event.
        sequence_nr: SequenceNr,
        /// Stored manifest.
        manifest: String,
        /// The type that owns the manifest.
        required_type: String,
    },

    /// Folding a recognized event failed.
    #[error("Event {sequence_nr} ({manifest}) could not be applied: {reason}")]
    Apply {
        /// Position of the event.
        sequence_nr: SequenceNr,
        /// Stored manifest.
        manifest: String,
        /// Failure description.
        reason: String,
    },

    /// The history could not be read.
    #[error("History cannot be loaded: {0}")]
    Store(String),
}

/// Result of a replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// History replayed; the entity exists.
    Ready,
    /// No history; the entity waits for its bootstrap command.
    Uninitialized,
    /// Replay failed; the entity is quarantined.
    Broken(RecoveryFailure),
    /// An archival/deletion event was found.
    InStorage {
        /// The protocol manifest that was observed.
        manifest: String,
    },
}

/// Replays stored events into entity state.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryRoom<'a> {
    codec: &'a MessageCodec,
}

impl<'a> RecoveryRoom<'a> {
    /// A recovery room using `codec` for decoding.
    #[must_use]
    pub const fn new(codec: &'a MessageCodec) -> Self {
        Self { codec }
    }

    /// Fold `events` into `state` in order.
    ///
    /// On failure `state` holds everything before the offending event.
    pub fn replay<E: ModelEntity>(
        &self,
        state: &mut EntityState<E>,
        events: impl IntoIterator<Item = PersistedEvent>,
    ) -> RecoveryOutcome {
        for persisted in events {
            let sequence_nr = persisted.sequence_nr;
            let stored = persisted.event;
            let event = match self.codec.decode_event::<E::Event>(E::ENTITY_TYPE, &stored) {
                Decoded::Message(event) => event,
                Decoded::Unrecognized { manifest } => {
                    return RecoveryOutcome::Broken(RecoveryFailure::Unrecognized {
                        sequence_nr,
                        manifest,
                    });
                }
                Decoded::DeserializationFailure { manifest, reason, .. } => {
                    return RecoveryOutcome::Broken(RecoveryFailure::Decode {
                        sequence_nr,
                        manifest,
                        reason,
                    });
                }
                Decoded::ForeignEntity {
                    manifest,
                    required_type,
                } => {
                    return RecoveryOutcome::Broken(RecoveryFailure::ForeignEntity {
                        sequence_nr,
                        manifest,
                        required_type,
                    });
                }
                Decoded::StorageProtocol { manifest } => {
                    return RecoveryOutcome::InStorage { manifest };
                }
            };

            if let Err(reason) = fold(state, &event, &stored.metadata) {
                return RecoveryOutcome::Broken(RecoveryFailure::Apply {
                    sequence_nr,
                    manifest: stored.manifest,
                    reason,
                });
            }
            state.meta.sequence_nr = sequence_nr;
        }

        if state.meta.sequence_nr.is_initial() {
            RecoveryOutcome::Uninitialized
        } else {
            RecoveryOutcome::Ready
        }
    }
}

/// Fold one decoded event into the state, converting panics into errors.
pub(crate) fn fold<E: ModelEntity>(
    state: &mut EntityState<E>,
    event: &EntityEvent<E::Event>,
    metadata: &EventMetadata,
) -> Result<(), String> {
    if state.meta.tenant.is_none() {
        state.meta.tenant = Some(metadata.tenant.clone());
    }
    match event {
        EntityEvent::Domain(event) => {
            let entity = &mut state.entity;
            match catch_unwind(AssertUnwindSafe(|| entity.apply(event, metadata))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
            }
        }
        EntityEvent::Runtime(RuntimeEvent::EntityModified { last_modified }) => {
            state.meta.last_modified = Some(*last_modified);
            Ok(())
        }
        EntityEvent::Runtime(RuntimeEvent::EngineVersionChanged { version }) => {
            state.meta.engine_version = Some(version.clone());
            Ok(())
        }
        EntityEvent::Runtime(RuntimeEvent::Debug { .. }) => Ok(()),
    }
}

/// Restore a snapshot, if it decodes.
pub(crate) fn restore_snapshot<E: ModelEntity>(bytes: &[u8]) -> Result<EntityState<E>, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}
