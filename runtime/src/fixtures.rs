//! A minimal entity for unit tests of the runtime components.

#![allow(clippy::panic)]

use crate::back_office::BackOffice;
use crate::config::RuntimeConfig;
use crate::entity::ModelEntity;
use crate::transaction::Transaction;
use casework_core::codec::{ManifestSpec, MessageCodec};
use casework_core::entity::EntityId;
use casework_core::environment::SystemClock;
use casework_core::error::{ApplyError, CommandError};
use casework_core::event::{EventMetadata, ModelEvent};
use casework_core::message::{CommandEnvelope, ModelCommand, UserIdentity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub created: bool,
    pub value: i64,
    pub frozen: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterCommand {
    Create { start: i64 },
    Add { amount: i64 },
    Set { value: i64 },
    Explode,
}

impl ModelCommand for CounterCommand {
    fn is_bootstrap(&self) -> bool {
        matches!(self, Self::Create { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterEvent {
    Created { start: i64 },
    Added { amount: i64 },
    Set { value: i64 },
}

impl ModelEvent for CounterEvent {}

impl ModelEntity for Counter {
    const ENTITY_TYPE: &'static str = "Counter";
    const COMMAND_MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("Create"),
        ManifestSpec::new("Add"),
        ManifestSpec::new("Set"),
        ManifestSpec::new("Explode"),
    ];
    const EVENT_MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("Created"),
        ManifestSpec::new("Added"),
        ManifestSpec::new("Set"),
    ];

    type Command = CounterCommand;
    type Event = CounterEvent;
    type Settings = ();

    fn create(_id: &EntityId) -> Self {
        Self::default()
    }

    fn supports(&self, _command: &CounterCommand) -> bool {
        !self.frozen
    }

    fn validate(&self, command: &CounterCommand, _tx: &Transaction<Self>) -> Result<(), CommandError> {
        match command {
            CounterCommand::Add { amount } if *amount < 0 => {
                Err(CommandError::invalid("Amount must not be negative"))
            }
            _ => Ok(()),
        }
    }

    fn execute(
        &mut self,
        command: CounterCommand,
        tx: &mut Transaction<Self>,
    ) -> Result<serde_json::Value, CommandError> {
        match command {
            CounterCommand::Create { start } => tx.add_event(self, CounterEvent::Created { start })?,
            CounterCommand::Add { amount } => tx.add_event(self, CounterEvent::Added { amount })?,
            CounterCommand::Set { value } if value != self.value => {
                tx.add_event(self, CounterEvent::Set { value })?;
            }
            CounterCommand::Set { .. } => {}
            CounterCommand::Explode => panic!("counter exploded"),
        }
        Ok(serde_json::json!({ "value": self.value }))
    }

    fn apply(&mut self, event: &CounterEvent, _metadata: &EventMetadata) -> Result<(), ApplyError> {
        match event {
            CounterEvent::Created { start } => {
                self.created = true;
                self.value = *start;
            }
            CounterEvent::Added { amount } => self.value += amount,
            CounterEvent::Set { value } => self.value = *value,
        }
        Ok(())
    }
}

pub fn codec() -> Arc<MessageCodec> {
    Arc::new(
        MessageCodec::builder()
            .commands(Counter::ENTITY_TYPE, Counter::COMMAND_MANIFESTS)
            .events(Counter::ENTITY_TYPE, Counter::EVENT_MANIFESTS)
            .build()
            .unwrap_or_else(|e| panic!("counter codec: {e}")),
    )
}

pub fn back_office() -> BackOffice<Counter> {
    BackOffice::new(
        Arc::new(()),
        codec(),
        Arc::new(SystemClock),
        Arc::new(RuntimeConfig::default()),
    )
}

pub fn envelope(command: CounterCommand) -> CommandEnvelope<CounterCommand> {
    CommandEnvelope::new("counter-1", UserIdentity::new("alice", "acme"), command)
}
