//! Hosting of entity actors.
//!
//! [`EntityHost`] owns the mailboxes of all live instances of one entity type.
//! Sending to an id that has no live actor starts one, which recovers before it
//! reads its mailbox. At most one actor runs per id: a stopping actor is
//! awaited before its successor starts.

use crate::actor::{self, EntityActor, Inbound};
use crate::back_office::BackOffice;
use crate::entity::{EntityState, ModelEntity};
use crate::system::{CommandRouter, Shared, SystemInner};
use casework_core::codec::Decoded;
use casework_core::entity::EntityId;
use casework_core::message::{CommandEnvelope, EncodedMessage};
use casework_core::response::{Failure, FailureKind, ModelResponse};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, mpsc, oneshot, watch};

/// Attempts to hand a message to a live actor before giving up.
const DELIVERY_ATTEMPTS: usize = 3;

struct ActorSlot<E: ModelEntity> {
    sender: mpsc::Sender<Inbound<E>>,
    stopped: watch::Receiver<()>,
}

pub(crate) struct HostInner<E: ModelEntity> {
    shared: Shared,
    back_office: BackOffice<E>,
    system: Weak<SystemInner>,
    actors: RwLock<HashMap<EntityId, ActorSlot<E>>>,
}

/// Host of all instances of entity type `E`.
pub struct EntityHost<E: ModelEntity> {
    inner: Arc<HostInner<E>>,
}

impl<E: ModelEntity> Clone for EntityHost<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ModelEntity> EntityHost<E> {
    pub(crate) fn new(shared: Shared, settings: Arc<E::Settings>, system: Weak<SystemInner>) -> Self {
        let back_office = BackOffice::new(
            settings,
            Arc::clone(&shared.codec),
            Arc::clone(&shared.clock),
            Arc::clone(&shared.config),
        );
        Self {
            inner: Arc::new(HostInner {
                shared,
                back_office,
                system,
                actors: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<HostInner<E>>) -> Self {
        Self { inner }
    }

    /// Send a command and wait for its response.
    pub async fn ask(&self, envelope: CommandEnvelope<E::Command>) -> ModelResponse {
        let message_id = envelope.message_id;
        let entity_id = envelope.entity_id.clone();
        let (reply, answer) = oneshot::channel();
        let message = Inbound::Command {
            envelope,
            reply: Some(reply),
        };
        if !self.deliver(&entity_id, message).await {
            return ModelResponse::failure(
                message_id,
                entity_id,
                None,
                Failure::new(FailureKind::Routing, "Entity cannot be reached"),
            );
        }
        answer.await.unwrap_or_else(|_| {
            ModelResponse::failure(
                message_id,
                entity_id,
                None,
                Failure::new(FailureKind::Routing, "Entity stopped before answering"),
            )
        })
    }

    /// Send a command without waiting for the response.
    pub async fn tell(&self, envelope: CommandEnvelope<E::Command>) {
        let entity_id = envelope.entity_id.clone();
        let message = Inbound::Command { envelope, reply: None };
        if !self.deliver(&entity_id, message).await {
            tracing::warn!(entity_id = %entity_id, entity_type = E::ENTITY_TYPE, "Command dropped");
        }
    }

    /// The state of a ready entity, recovering it first if needed.
    ///
    /// `None` for an entity that does not exist, is broken or is in storage.
    pub async fn inspect(&self, entity_id: &EntityId) -> Option<EntityState<E>> {
        let (reply, answer) = oneshot::channel();
        if !self.deliver(entity_id, Inbound::Inspect { reply }).await {
            return None;
        }
        answer.await.ok().flatten()
    }

    /// Whether an actor is currently running for `entity_id`.
    pub async fn is_active(&self, entity_id: &EntityId) -> bool {
        self.inner
            .actors
            .read()
            .await
            .get(entity_id)
            .is_some_and(|slot| !slot.sender.is_closed())
    }

    /// Number of running actors.
    pub async fn active_count(&self) -> usize {
        self.inner
            .actors
            .read()
            .await
            .values()
            .filter(|slot| !slot.sender.is_closed())
            .count()
    }

    /// Hand a message to the actor of `entity_id`, starting one if needed.
    ///
    /// Returns `false` if no live actor could take the message.
    pub(crate) async fn deliver(&self, entity_id: &EntityId, message: Inbound<E>) -> bool {
        let mut message = message;
        for _ in 0..DELIVERY_ATTEMPTS {
            let sender = self.sender(entity_id).await;
            match sender.send(message).await {
                Ok(()) => return true,
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }
        tracing::error!(
            entity_id = %entity_id,
            entity_type = E::ENTITY_TYPE,
            "No live actor accepted the message"
        );
        false
    }

    async fn sender(&self, entity_id: &EntityId) -> mpsc::Sender<Inbound<E>> {
        loop {
            if let Some(slot) = self.inner.actors.read().await.get(entity_id) {
                if !slot.sender.is_closed() {
                    return slot.sender.clone();
                }
            }

            let mut actors = self.inner.actors.write().await;
            let mut stopped = match actors.get(entity_id) {
                Some(slot) if !slot.sender.is_closed() => return slot.sender.clone(),
                Some(slot) => slot.stopped.clone(),
                None => {
                    let slot = self.spawn(entity_id);
                    let sender = slot.sender.clone();
                    actors.insert(entity_id.clone(), slot);
                    return sender;
                }
            };
            drop(actors);

            // Resolves once the stopping actor dropped its end.
            while stopped.changed().await.is_ok() {}
            let mut actors = self.inner.actors.write().await;
            if actors.get(entity_id).is_some_and(|slot| slot.sender.is_closed()) {
                actors.remove(entity_id);
            }
        }
    }

    fn spawn(&self, entity_id: &EntityId) -> ActorSlot<E> {
        let (sender, receiver) = mpsc::channel(self.inner.shared.config.mailbox_capacity.max(1));
        let (alive, stopped) = watch::channel(());
        let actor = EntityActor::new(
            entity_id.clone(),
            self.inner.back_office.clone(),
            self.inner.shared.clone(),
            Arc::downgrade(&self.inner),
            self.inner.system.clone(),
        );
        tracing::debug!(entity_id = %entity_id, entity_type = E::ENTITY_TYPE, "Starting entity actor");
        tokio::spawn(actor::run(actor, receiver, alive));
        ActorSlot { sender, stopped }
    }

    /// Forget the slot of a stopped actor.
    pub(crate) async fn release(&self, entity_id: &EntityId) {
        let mut actors = self.inner.actors.write().await;
        if actors.get(entity_id).is_some_and(|slot| slot.sender.is_closed()) {
            actors.remove(entity_id);
        }
    }
}

impl<E: ModelEntity> CommandRouter for EntityHost<E> {
    fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    fn route(&self, envelope: CommandEnvelope<EncodedMessage>) -> BoxFuture<'static, ModelResponse> {
        let host = self.clone();
        Box::pin(async move {
            let decoded = host
                .inner
                .shared
                .codec
                .decode_command::<E::Command>(E::ENTITY_TYPE, &envelope.command);
            let failure = match decoded {
                Decoded::Message(command) => return host.ask(envelope.map(|_| command)).await,
                Decoded::DeserializationFailure { manifest, reason, .. } => Failure::new(
                    FailureKind::Validation,
                    format!("Command {manifest} cannot be read: {reason}"),
                ),
                Decoded::ForeignEntity {
                    manifest,
                    required_type,
                } => Failure::new(
                    FailureKind::Routing,
                    format!("Command {manifest} belongs to {required_type}, not {}", E::ENTITY_TYPE),
                ),
                Decoded::Unrecognized { manifest } | Decoded::StorageProtocol { manifest } => Failure::new(
                    FailureKind::Routing,
                    format!("Unknown command {manifest} for {}", E::ENTITY_TYPE),
                ),
            };
            tracing::warn!(
                entity_id = %envelope.entity_id,
                entity_type = E::ENTITY_TYPE,
                failure = %failure,
                "Command not routed"
            );
            ModelResponse::failure(envelope.message_id, envelope.entity_id, None, failure)
        })
    }
}

impl<E: ModelEntity> std::fmt::Debug for EntityHost<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHost")
            .field("entity_type", &E::ENTITY_TYPE)
            .finish_non_exhaustive()
    }
}
