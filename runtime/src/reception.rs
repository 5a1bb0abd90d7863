//! Admission control.
//!
//! [`Reception`] tracks the lifecycle phase of one entity instance and decides
//! for every inbound message whether it may reach the entity.
//!
//! | Phase | Bootstrap command | Other command | Response |
//! |---|---|---|---|
//! | `Uninitialized` | process | reject `NotInitialized` | process |
//! | `Recovering` | defer | defer | defer |
//! | `Ready` | reject `AlreadyExists` | process | process |
//! | `Broken` | reject `Broken` | reject `Broken` | process |
//! | `InStorage` | reject `InStorage` | reject `InStorage` | process |

use casework_core::entity::EntityId;
use casework_core::response::{Failure, FailureKind, SYSTEM_FAILURE_MESSAGE};
use std::fmt;

/// Lifecycle phase of an entity instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No history; waiting for the bootstrap command.
    Uninitialized,
    /// Replaying history.
    Recovering,
    /// Accepting commands.
    Ready,
    /// Recovery failed; quarantined.
    Broken {
        /// Human readable cause.
        cause: String,
    },
    /// Archival or deletion in progress.
    InStorage,
}

impl Phase {
    /// Whether the instance must be torn down after answering pending traffic.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Broken { .. } | Self::InStorage)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Recovering => f.write_str("recovering"),
            Self::Ready => f.write_str("ready"),
            Self::Broken { .. } => f.write_str("broken"),
            Self::InStorage => f.write_str("in storage"),
        }
    }
}

/// What arrives at the door.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arrival {
    /// A command; `bootstrap` tells whether it creates the entity.
    Command {
        /// Whether the command is a bootstrap command.
        bootstrap: bool,
    },
    /// The answer to a command the entity sent itself.
    Response,
}

/// Admission decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Hold the message until recovery finished.
    Recover,
    /// Hand the message to the pipeline.
    Process,
    /// Answer with a failure without touching the entity.
    Reject(Rejection),
}

/// Why a message was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Non-bootstrap command for an entity that does not exist yet.
    NotInitialized,
    /// Bootstrap command for an entity that already exists.
    AlreadyExists,
    /// The entity is quarantined.
    Broken,
    /// The entity is being archived or deleted.
    InStorage,
    /// The command cannot be handled by this entity.
    Unsupported(String),
}

impl Rejection {
    /// The failure handed to the caller.
    #[must_use]
    pub fn failure(&self, entity_id: &EntityId, entity_type: &str) -> Failure {
        match self {
            Self::NotInitialized => Failure::new(
                FailureKind::Routing,
                format!("{entity_type} '{entity_id}' is not yet initialized"),
            ),
            Self::AlreadyExists => Failure::new(
                FailureKind::Validation,
                format!("{entity_type} '{entity_id}' already exists"),
            ),
            Self::Broken => Failure::new(FailureKind::Recovery, SYSTEM_FAILURE_MESSAGE),
            Self::InStorage => Failure::new(
                FailureKind::InStorage,
                format!("{entity_type} '{entity_id}' is being archived or deleted"),
            ),
            Self::Unsupported(command) => Failure::new(
                FailureKind::Routing,
                format!("{entity_type} '{entity_id}' cannot handle {command}"),
            ),
        }
    }
}

/// Admission gate of one entity instance.
#[derive(Debug)]
pub struct Reception {
    phase: Phase,
}

impl Reception {
    /// A gate for an instance that is about to recover.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Recovering,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Move to another phase.
    pub fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "Reception phase change");
        self.phase = phase;
    }

    /// Decide what happens to an arrival.
    #[must_use]
    pub fn admit(&self, arrival: Arrival) -> Admission {
        match (&self.phase, arrival) {
            (Phase::Recovering, _) => Admission::Recover,
            (_, Arrival::Response) => Admission::Process,
            (Phase::Uninitialized, Arrival::Command { bootstrap: true })
            | (Phase::Ready, Arrival::Command { bootstrap: false }) => Admission::Process,
            (Phase::Uninitialized, Arrival::Command { bootstrap: false }) => {
                Admission::Reject(Rejection::NotInitialized)
            }
            (Phase::Ready, Arrival::Command { bootstrap: true }) => {
                Admission::Reject(Rejection::AlreadyExists)
            }
            (Phase::Broken { .. }, Arrival::Command { .. }) => Admission::Reject(Rejection::Broken),
            (Phase::InStorage, Arrival::Command { .. }) => Admission::Reject(Rejection::InStorage),
        }
    }
}

impl Default for Reception {
    fn default() -> Self {
        Self::new()
    }
}
