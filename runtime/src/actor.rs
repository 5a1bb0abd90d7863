//! The per-entity actor loop.
//!
//! One tokio task per entity id owns the entity state, its admission gate, its
//! timers and its pending asks, and processes its mailbox strictly one message
//! at a time. The loop:
//!
//! 1. recovers the entity (snapshot, then replay) before reading the mailbox, so
//!    everything that arrives meanwhile waits in the queue,
//! 2. handles commands, responses and timer deliveries in arrival order,
//! 3. stops after `idle_timeout` without traffic (unless timers or asks are
//!    pending), or right after recovery left the entity broken or in storage.
//!
//! On stop the mailbox is closed and drained: queued messages are still handled
//! (or rejected, for a broken entity) so no caller is left without an answer.

use crate::back_office::{BackOffice, Commit};
use crate::entity::{EntityState, ModelEntity};
use crate::host::{EntityHost, HostInner};
use crate::metrics::{CommandMetrics, LifecycleMetrics};
use crate::reception::{Admission, Arrival, Phase, Reception};
use crate::recovery::{RecoveryFailure, RecoveryOutcome, RecoveryRoom, restore_snapshot};
use crate::responder::{PendingAsk, Responders};
use crate::system::{EntitySystem, Shared, SystemInner};
use crate::timers::TimerRegistry;
use crate::transaction::{OutgoingAsk, TimerAction};
use casework_core::entity::{EntityId, SequenceNr};
use casework_core::error::CommandError;
use casework_core::event::StoredEvent;
use casework_core::message::{CommandEnvelope, ModelCommand, UserIdentity};
use casework_core::response::{Failure, FailureKind, ModelResponse};
use std::sync::Weak;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};

/// Messages in an entity's mailbox.
pub(crate) enum Inbound<E: ModelEntity> {
    /// A command, with an optional reply channel.
    Command {
        envelope: CommandEnvelope<E::Command>,
        reply: Option<oneshot::Sender<ModelResponse>>,
    },
    /// The answer to an ask this entity sent.
    Response(ModelResponse),
    /// A timer fired.
    Timer {
        key: String,
        generation: u64,
        command: E::Command,
        user: UserIdentity,
    },
    /// Read the current state.
    Inspect {
        reply: oneshot::Sender<Option<EntityState<E>>>,
    },
}

pub(crate) struct EntityActor<E: ModelEntity> {
    state: EntityState<E>,
    reception: Reception,
    timers: TimerRegistry,
    responders: Responders<E>,
    back_office: BackOffice<E>,
    shared: Shared,
    host: Weak<HostInner<E>>,
    system: Weak<SystemInner>,
    last_snapshot: SequenceNr,
}

impl<E: ModelEntity> EntityActor<E> {
    pub(crate) fn new(
        id: EntityId,
        back_office: BackOffice<E>,
        shared: Shared,
        host: Weak<HostInner<E>>,
        system: Weak<SystemInner>,
    ) -> Self {
        Self {
            state: EntityState::blank(id),
            reception: Reception::new(),
            timers: TimerRegistry::new(),
            responders: Responders::new(),
            back_office,
            shared,
            host,
            system,
            last_snapshot: SequenceNr::INITIAL,
        }
    }

    fn id(&self) -> &EntityId {
        &self.state.meta.id
    }

    fn is_busy(&self) -> bool {
        !self.timers.is_empty() || !self.responders.is_empty()
    }

    async fn recover(&mut self) {
        let started = Instant::now();
        let id = self.id().clone();

        match self.shared.store.load_snapshot(id.clone()).await {
            Ok(Some((sequence_nr, bytes))) => match restore_snapshot::<E>(&bytes) {
                Ok(mut state) => {
                    state.meta.sequence_nr = sequence_nr;
                    self.state = state;
                    self.last_snapshot = sequence_nr;
                }
                Err(reason) => tracing::warn!(
                    entity_id = %id,
                    entity_type = E::ENTITY_TYPE,
                    reason = %reason,
                    "Snapshot cannot be restored, replaying full history"
                ),
            },
            Ok(None) => {}
            Err(error) => tracing::warn!(
                entity_id = %id,
                entity_type = E::ENTITY_TYPE,
                error = %error,
                "Snapshot cannot be loaded, replaying full history"
            ),
        }

        let from = self.state.meta.sequence_nr.next();
        let outcome = match self.shared.store.load_events(id.clone(), Some(from)).await {
            Ok(events) => RecoveryRoom::new(&self.shared.codec).replay(&mut self.state, events),
            Err(error) => RecoveryOutcome::Broken(RecoveryFailure::Store(error.to_string())),
        };

        let label = match outcome {
            RecoveryOutcome::Ready => {
                self.reception.enter(Phase::Ready);
                tracing::info!(
                    entity_id = %id,
                    entity_type = E::ENTITY_TYPE,
                    sequence_nr = %self.state.meta.sequence_nr,
                    "Entity recovered"
                );
                if let Some(commit) = self.back_office.recovery_completed(&self.state) {
                    let response = self.commit(commit).await;
                    if let Some(failure) = response.failure_ref() {
                        tracing::warn!(entity_id = %id, failure = %failure, "Recovery completion could not be stored");
                    }
                }
                "ready"
            }
            RecoveryOutcome::Uninitialized => {
                self.reception.enter(Phase::Uninitialized);
                "uninitialized"
            }
            RecoveryOutcome::Broken(failure) => {
                tracing::error!(
                    entity_id = %id,
                    entity_type = E::ENTITY_TYPE,
                    tenant = ?self.state.meta.tenant,
                    cause = %failure,
                    "Entity recovery failed, quarantining instance"
                );
                LifecycleMetrics::record_broken(E::ENTITY_TYPE);
                self.reception.enter(Phase::Broken {
                    cause: failure.to_string(),
                });
                "broken"
            }
            RecoveryOutcome::InStorage { manifest } => {
                tracing::info!(entity_id = %id, manifest = %manifest, "Entity is in storage");
                self.reception.enter(Phase::InStorage);
                "in_storage"
            }
        };
        LifecycleMetrics::record_recovery(E::ENTITY_TYPE, label, started.elapsed());
    }

    async fn receive(&mut self, message: Inbound<E>) {
        match message {
            Inbound::Command { envelope, reply } => {
                let started = Instant::now();
                let response = self.handle_command(envelope).await;
                CommandMetrics::record(E::ENTITY_TYPE, response.failure_kind(), started.elapsed());
                if let Some(reply) = reply {
                    let _ = reply.send(response);
                } else if let Some(failure) = response.failure_ref() {
                    tracing::debug!(entity_id = %self.id(), failure = %failure, "Unanswered command failed");
                }
            }
            Inbound::Response(response) => self.handle_response(response).await,
            Inbound::Timer {
                key,
                generation,
                command,
                user,
            } => self.handle_timer(key, generation, command, user).await,
            Inbound::Inspect { reply } => {
                let state = (*self.reception.phase() == Phase::Ready).then(|| self.state.clone());
                let _ = reply.send(state);
            }
        }
    }

    async fn handle_command(&mut self, envelope: CommandEnvelope<E::Command>) -> ModelResponse {
        let arrival = Arrival::Command {
            bootstrap: envelope.command.is_bootstrap(),
        };
        match self.reception.admit(arrival) {
            Admission::Process => {}
            Admission::Reject(rejection) => {
                tracing::debug!(
                    entity_id = %self.id(),
                    message_id = %envelope.message_id,
                    rejection = ?rejection,
                    "Command rejected at reception"
                );
                return ModelResponse::failure(
                    envelope.message_id,
                    envelope.entity_id,
                    self.state.meta.last_modified,
                    rejection.failure(self.id(), E::ENTITY_TYPE),
                );
            }
            Admission::Recover => {
                return ModelResponse::failure(
                    envelope.message_id,
                    envelope.entity_id,
                    None,
                    Failure::new(FailureKind::Routing, "Entity is still recovering"),
                );
            }
        }

        match self.back_office.handle_command(&self.state, envelope) {
            Ok(commit) => {
                let bootstrap = *self.reception.phase() == Phase::Uninitialized;
                let response = self.commit(commit).await;
                if bootstrap && !self.state.meta.sequence_nr.is_initial() {
                    self.reception.enter(Phase::Ready);
                }
                response
            }
            Err(response) => response,
        }
    }

    async fn handle_response(&mut self, response: ModelResponse) {
        if self.reception.admit(Arrival::Response) != Admission::Process || self.reception.phase().is_terminal() {
            tracing::warn!(
                entity_id = %self.id(),
                message_id = %response.message_id,
                phase = %self.reception.phase(),
                "Response arrived for an entity that cannot handle it"
            );
            return;
        }
        let Some((callback, user)) = self.responders.take(&response) else {
            tracing::warn!(
                entity_id = %self.id(),
                entity_type = E::ENTITY_TYPE,
                message_id = %response.message_id,
                from = %response.entity_id,
                "Response does not match any pending ask"
            );
            CommandMetrics::record_unmatched_response(E::ENTITY_TYPE);
            return;
        };

        match self.back_office.handle_response(&self.state, &response, callback, user) {
            Ok(commit) => {
                let outcome = self.commit(commit).await;
                if let Some(failure) = outcome.failure_ref() {
                    tracing::warn!(entity_id = %self.id(), failure = %failure, "Response handling not stored");
                }
            }
            Err(CommandError::Internal(cause)) => tracing::error!(
                entity_id = %self.id(),
                entity_type = E::ENTITY_TYPE,
                message_id = %response.message_id,
                cause = %cause,
                "Response handling failed"
            ),
            Err(error) => tracing::warn!(
                entity_id = %self.id(),
                message_id = %response.message_id,
                error = %error,
                "Response handling refused"
            ),
        }
    }

    async fn handle_timer(&mut self, key: String, generation: u64, command: E::Command, user: UserIdentity) {
        if !self.timers.complete(&key, generation) {
            tracing::debug!(entity_id = %self.id(), key = %key, "Dropping stale timer delivery");
            return;
        }
        CommandMetrics::record_timer_fired(E::ENTITY_TYPE);
        let envelope = CommandEnvelope::new(self.id().clone(), user, command);
        let response = self.handle_command(envelope).await;
        if let Some(failure) = response.failure_ref() {
            tracing::warn!(entity_id = %self.id(), key = %key, failure = %failure, "Timer command failed");
        }
    }

    /// Persist a commit; on success the working copy becomes the live state.
    async fn commit(&mut self, commit: Commit<E>) -> ModelResponse {
        let response = commit.response();
        let Commit {
            state,
            events,
            metadata,
            message_id,
            timers,
            asks,
            ..
        } = commit;

        if !events.is_empty() {
            let encoded: Result<Vec<StoredEvent>, _> = events
                .iter()
                .map(|event| self.shared.codec.encode_event(E::ENTITY_TYPE, event, metadata.clone()))
                .collect();
            let stored = match encoded {
                Ok(stored) => stored,
                Err(error) => {
                    tracing::error!(
                        entity_id = %self.id(),
                        entity_type = E::ENTITY_TYPE,
                        message_id = %message_id,
                        error = %error,
                        "Events cannot be encoded"
                    );
                    return self.system_failure(message_id, FailureKind::Engine);
                }
            };

            let count = stored.len();
            let started = Instant::now();
            let expected = self.state.meta.sequence_nr;
            match self.shared.store.append_events(self.id().clone(), Some(expected), stored).await {
                Ok(sequence_nr) => {
                    CommandMetrics::record_append(E::ENTITY_TYPE, count, started.elapsed());
                    self.state = state;
                    self.state.meta.sequence_nr = sequence_nr;
                    self.maybe_snapshot().await;
                }
                Err(error) => {
                    tracing::error!(
                        entity_id = %self.id(),
                        entity_type = E::ENTITY_TYPE,
                        tenant = %metadata.tenant,
                        message_id = %message_id,
                        user = %metadata.user_id,
                        error = %error,
                        "Events cannot be persisted, command discarded"
                    );
                    return self.system_failure(message_id, FailureKind::Persistence);
                }
            }
        }

        self.apply_timers(timers);
        self.send_asks(asks);
        response
    }

    fn system_failure(&self, message_id: casework_core::message::MessageId, kind: FailureKind) -> ModelResponse {
        ModelResponse::failure(
            message_id,
            self.id().clone(),
            self.state.meta.last_modified,
            Failure::system(kind),
        )
    }

    async fn maybe_snapshot(&mut self) {
        let interval = self.shared.config.snapshot_interval;
        let current = self.state.meta.sequence_nr.value();
        if interval == 0 || current / interval == self.last_snapshot.value() / interval {
            return;
        }
        let bytes = match serde_json::to_vec(&self.state) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(entity_id = %self.id(), error = %error, "Snapshot cannot be serialized");
                return;
            }
        };
        match self
            .shared
            .store
            .save_snapshot(self.id().clone(), self.state.meta.sequence_nr, bytes)
            .await
        {
            Ok(()) => {
                self.last_snapshot = self.state.meta.sequence_nr;
                CommandMetrics::record_snapshot(E::ENTITY_TYPE);
            }
            Err(error) => tracing::warn!(entity_id = %self.id(), error = %error, "Snapshot cannot be saved"),
        }
    }

    fn apply_timers(&mut self, actions: Vec<TimerAction<E::Command>>) {
        for action in actions {
            match action {
                TimerAction::Schedule {
                    key,
                    after,
                    command,
                    user,
                } => {
                    let host = self.host.clone();
                    let id = self.id().clone();
                    let job_key = key.clone();
                    self.timers.schedule(key, after, move |generation| async move {
                        match host.upgrade() {
                            Some(inner) => {
                                let message = Inbound::Timer {
                                    key: job_key,
                                    generation,
                                    command,
                                    user,
                                };
                                EntityHost::from_inner(inner).deliver(&id, message).await;
                            }
                            None => tracing::warn!(entity_id = %id, key = %job_key, "Timer fired after host shutdown"),
                        }
                    });
                }
                TimerAction::Cancel { key } => {
                    self.timers.cancel(&key);
                }
            }
        }
    }

    fn send_asks(&mut self, asks: Vec<OutgoingAsk<E>>) {
        for ask in asks {
            let OutgoingAsk {
                target_type,
                envelope,
                on_success,
                on_failure,
            } = ask;
            let message_id = envelope.message_id;
            self.responders.register(
                message_id,
                PendingAsk {
                    target: envelope.entity_id.clone(),
                    user: envelope.user.clone(),
                    on_success,
                    on_failure,
                },
            );

            let system = self.system.clone();
            let host = self.host.clone();
            let id = self.id().clone();
            let timeout = self.shared.config.ask_timeout;
            tokio::spawn(async move {
                let target = envelope.entity_id.clone();
                let response = match system.upgrade() {
                    Some(inner) => {
                        let system = EntitySystem::from_inner(inner);
                        tokio::time::timeout(timeout, system.route(&target_type, envelope))
                            .await.unwrap_or_else(|_| {
                            ModelResponse::failure(
                                message_id,
                                target,
                                None,
                                Failure::new(
                                    FailureKind::Routing,
                                    format!("No response from {target_type} within {timeout:?}"),
                                ),
                            )
                        })
                    }
                    None => ModelResponse::failure(
                        message_id,
                        target,
                        None,
                        Failure::new(FailureKind::Routing, "Entity system is shut down"),
                    ),
                };
                if let Some(inner) = host.upgrade() {
                    EntityHost::from_inner(inner).deliver(&id, Inbound::Response(response)).await;
                }
            });
        }
    }
}

/// Run an entity actor until it stops.
///
/// `alive` is dropped on exit; the host waits for that before starting a
/// successor for the same id.
pub(crate) async fn run<E: ModelEntity>(
    mut actor: EntityActor<E>,
    mut rx: mpsc::Receiver<Inbound<E>>,
    alive: watch::Sender<()>,
) {
    LifecycleMetrics::actor_started(E::ENTITY_TYPE);
    actor.recover().await;

    let idle_timeout = actor.shared.config.idle_timeout;
    while !actor.reception.phase().is_terminal() {
        let next = if actor.is_busy() {
            rx.recv().await
        } else {
            match tokio::time::timeout(idle_timeout, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::info!(
                        entity_id = %actor.id(),
                        entity_type = E::ENTITY_TYPE,
                        "Entity idle, stopping"
                    );
                    break;
                }
            }
        };
        match next {
            Some(message) => actor.receive(message).await,
            None => break,
        }
    }

    rx.close();
    while let Some(message) = rx.recv().await {
        actor.receive(message).await;
    }
    let cancelled = actor.timers.cancel_all();
    if cancelled > 0 {
        tracing::debug!(entity_id = %actor.id(), cancelled, "Cancelled timers on stop");
    }

    if let Some(host) = actor.host.upgrade() {
        EntityHost::from_inner(host).release(actor.id()).await;
    }
    LifecycleMetrics::actor_stopped(E::ENTITY_TYPE);
    drop(alive);
}
