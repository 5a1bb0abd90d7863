//! The command pipeline.
//!
//! [`BackOffice`] runs one unit of work against a **working copy** of the entity:
//!
//! 1. tenant and `supports` checks,
//! 2. `validate` on the live state (never mutates),
//! 3. `execute` on the working copy, events folded as they are added,
//! 4. runtime events: `EngineVersionChanged` first when the recorded engine
//!    differs, `EntityModified` last when at least one stateful event exists.
//!
//! The result is a [`Commit`] the caller persists; only after a successful append
//! does the working copy replace the live state. Panics in entity code are caught
//! and reported as engine failures.

use crate::config::RuntimeConfig;
use crate::entity::{EntityState, ModelEntity};
use crate::panic_message;
use crate::reception::Rejection;
use crate::transaction::{CommandMeta, OutgoingAsk, ResponseCallback, TimerAction, Transaction};
use casework_core::codec::MessageCodec;
use casework_core::environment::Clock;
use casework_core::error::CommandError;
use casework_core::event::{EntityEvent, EventMetadata, RuntimeEvent};
use casework_core::message::{CommandEnvelope, MessageId, ModelCommand, UserIdentity};
use casework_core::response::{Failure, FailureKind, ModelResponse};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// User id under which the runtime itself acts (recovery hooks).
pub const SYSTEM_USER: &str = "casework-system";

/// Outcome of a successful unit of work, ready to be persisted.
#[derive(Debug)]
pub struct Commit<E: ModelEntity> {
    /// The working copy with all events folded in.
    pub state: EntityState<E>,
    /// Events to append, runtime events included, in order.
    pub events: Vec<EntityEvent<E::Event>>,
    /// Metadata shared by the events.
    pub metadata: EventMetadata,
    /// Message id of the triggering command.
    pub message_id: MessageId,
    /// Timer changes to apply after persisting.
    pub timers: Vec<TimerAction<E::Command>>,
    /// Commands to send after persisting.
    pub asks: Vec<OutgoingAsk<E>>,
    /// Reply value for the caller.
    pub reply: Value,
}

impl<E: ModelEntity> Commit<E> {
    /// Whether anything has to be appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The success response, stamped with the working copy's last-modified.
    #[must_use]
    pub fn response(&self) -> ModelResponse {
        ModelResponse::success(
            self.message_id,
            self.state.meta.id.clone(),
            self.state.meta.last_modified,
            self.reply.clone(),
        )
    }
}

/// Command pipeline of one entity type.
pub struct BackOffice<E: ModelEntity> {
    settings: Arc<E::Settings>,
    codec: Arc<MessageCodec>,
    clock: Arc<dyn Clock>,
    config: Arc<RuntimeConfig>,
}

impl<E: ModelEntity> Clone for BackOffice<E> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            codec: Arc::clone(&self.codec),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E: ModelEntity> BackOffice<E> {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        settings: Arc<E::Settings>,
        codec: Arc<MessageCodec>,
        clock: Arc<dyn Clock>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            settings,
            codec,
            clock,
            config,
        }
    }

    /// Validate and execute a command.
    ///
    /// # Errors
    ///
    /// The failure response when the command is refused or fails.
    pub fn handle_command(
        &self,
        live: &EntityState<E>,
        envelope: CommandEnvelope<E::Command>,
    ) -> Result<Commit<E>, ModelResponse> {
        let CommandEnvelope {
            message_id,
            entity_id,
            tenant,
            user,
            command,
        } = envelope;
        let refuse = |failure: Failure| {
            ModelResponse::failure(message_id, entity_id.clone(), live.meta.last_modified, failure)
        };

        if let Some(owner) = &live.meta.tenant {
            if *owner != tenant {
                return Err(refuse(Failure::new(
                    FailureKind::Authorization,
                    format!("User '{}' is not allowed in tenant '{owner}'", user.id),
                )));
            }
        }
        if !live.entity.supports(&command) {
            return Err(refuse(
                Rejection::Unsupported(command.description()).failure(&entity_id, E::ENTITY_TYPE),
            ));
        }

        let meta = CommandMeta {
            message_id,
            entity_id: entity_id.clone(),
            entity_type: E::ENTITY_TYPE,
            tenant,
            user,
            timestamp: self.clock.now(),
        };
        let description = command.description();
        let mut tx = self.transaction(meta);

        let outcome = guarded(|| live.entity.validate(&command, &tx)).and_then(|()| {
            let mut working = live.clone();
            let reply = guarded(|| working.entity.execute(command, &mut tx))?;
            Ok((working, reply))
        });

        match outcome {
            Ok((working, reply)) => Ok(self.finish(working, tx, reply)),
            Err(error) => {
                log_failure::<E>(tx.meta(), &description, &error);
                Err(refuse(error.to_failure()))
            }
        }
    }

    /// Run the continuation of an ask.
    ///
    /// # Errors
    ///
    /// The callback's error; the working copy is discarded.
    pub fn handle_response(
        &self,
        live: &EntityState<E>,
        response: &ModelResponse,
        callback: ResponseCallback<E>,
        user: UserIdentity,
    ) -> Result<Commit<E>, CommandError> {
        let meta = CommandMeta {
            message_id: response.message_id,
            entity_id: live.meta.id.clone(),
            entity_type: E::ENTITY_TYPE,
            tenant: user.tenant.clone(),
            user,
            timestamp: self.clock.now(),
        };
        let mut working = live.clone();
        let mut tx = self.transaction(meta);
        guarded(|| callback(&mut working.entity, response, &mut tx))?;
        Ok(self.finish(working, tx, Value::Null))
    }

    /// Run the post-recovery hook.
    #[must_use]
    pub fn recovery_completed(&self, live: &EntityState<E>) -> Option<Commit<E>> {
        let tenant = live.meta.tenant.clone().unwrap_or_default();
        let meta = CommandMeta {
            message_id: MessageId::new(),
            entity_id: live.meta.id.clone(),
            entity_type: E::ENTITY_TYPE,
            tenant: tenant.clone(),
            user: UserIdentity::new(SYSTEM_USER, tenant),
            timestamp: self.clock.now(),
        };
        let mut working = live.clone();
        let mut tx = self.transaction(meta);
        match guarded(|| {
            working.entity.recovery_completed(&mut tx);
            Ok(())
        }) {
            Ok(()) => Some(self.finish(working, tx, Value::Null)),
            Err(error) => {
                tracing::error!(
                    entity_id = %live.meta.id,
                    entity_type = E::ENTITY_TYPE,
                    error = %error,
                    "Recovery completion hook failed"
                );
                None
            }
        }
    }

    fn transaction(&self, meta: CommandMeta) -> Transaction<E> {
        Transaction::new(meta, Arc::clone(&self.settings), Arc::clone(&self.codec))
    }

    fn finish(&self, mut working: EntityState<E>, tx: Transaction<E>, reply: Value) -> Commit<E> {
        let parts = tx.into_parts();
        let stateful = !parts.events.is_empty();
        let mut events = Vec::with_capacity(parts.events.len() + 3);

        if stateful && working.meta.engine_version.as_deref() != Some(&self.config.engine_version) {
            events.push(EntityEvent::Runtime(RuntimeEvent::EngineVersionChanged {
                version: self.config.engine_version.clone(),
            }));
            working.meta.engine_version = Some(self.config.engine_version.clone());
        }
        events.extend(parts.events.into_iter().map(EntityEvent::Domain));
        if self.config.debug && !parts.debug.is_empty() {
            events.push(EntityEvent::Runtime(RuntimeEvent::Debug {
                messages: parts.debug,
            }));
        }
        if stateful {
            events.push(EntityEvent::Runtime(RuntimeEvent::EntityModified {
                last_modified: parts.meta.timestamp,
            }));
            working.meta.last_modified = Some(parts.meta.timestamp);
            if working.meta.tenant.is_none() {
                working.meta.tenant = Some(parts.meta.tenant.clone());
            }
        }

        Commit {
            state: working,
            events,
            metadata: parts.meta.event_metadata(),
            message_id: parts.meta.message_id,
            timers: parts.timers,
            asks: parts.asks,
            reply,
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> Result<T, CommandError>) -> Result<T, CommandError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(CommandError::Internal(format!(
            "panic: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn log_failure<E: ModelEntity>(meta: &CommandMeta, command: &str, error: &CommandError) {
    match error {
        CommandError::Internal(cause) => tracing::error!(
            entity_id = %meta.entity_id,
            entity_type = E::ENTITY_TYPE,
            tenant = %meta.tenant,
            message_id = %meta.message_id,
            user = %meta.user.id,
            command,
            cause = %cause,
            "Command failed with an engine failure"
        ),
        CommandError::Unauthorized(reason) | CommandError::Invalid(reason) => tracing::debug!(
            entity_id = %meta.entity_id,
            message_id = %meta.message_id,
            kind = %error.kind(),
            reason = %reason,
            "Command refused"
        ),
    }
}
