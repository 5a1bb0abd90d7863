//! Responses and the failure taxonomy.
//!
//! Every command gets exactly one [`ModelResponse`], correlated by the command's
//! message id. Failures are classified by [`FailureKind`]:
//!
//! | Kind | Meaning | Logged |
//! |---|---|---|
//! | `Authorization` | actor lacks privilege | no |
//! | `Validation` | structurally invalid command or state | no |
//! | `Engine` | unexpected internal failure | error |
//! | `Persistence` | event append rejected | error |
//! | `Recovery` | entity quarantined after a failed replay | error (once) |
//! | `InStorage` | entity is being archived or deleted | no |
//! | `Routing` | wrong, unready or unknown target | no |

use crate::entity::EntityId;
use crate::message::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message returned for engine and persistence failures; details stay in the server logs.
pub const SYSTEM_FAILURE_MESSAGE: &str =
    "Handling the request resulted in a system failure. Check the server logs for more information.";

/// Classification of a failed command.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The acting user lacks the privilege.
    Authorization,
    /// The command is invalid against the current state.
    Validation,
    /// Unexpected internal failure during validation or execution.
    Engine,
    /// The event store rejected the append.
    Persistence,
    /// The entity failed to recover and is quarantined.
    Recovery,
    /// The entity is being archived or deleted.
    InStorage,
    /// The command cannot be routed to a live entity of the right type.
    Routing,
}

impl FailureKind {
    /// Manifest tag of a failure response of this kind.
    #[must_use]
    pub const fn manifest(self) -> &'static str {
        match self {
            Self::Authorization => "AuthorizationFailure",
            Self::Validation => "ValidationFailure",
            Self::Engine => "EngineFailure",
            Self::Persistence => "PersistenceFailure",
            Self::Recovery => "RecoveryFailure",
            Self::InStorage => "InStorageFailure",
            Self::Routing => "RoutingFailure",
        }
    }

    /// Whether the caller can fix the cause by changing the request.
    #[must_use]
    pub const fn is_caller_error(self) -> bool {
        matches!(self, Self::Authorization | Self::Validation)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest())
    }
}

/// A typed failure with a descriptive message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure class.
    pub kind: FailureKind,
    /// Human readable description.
    pub message: String,
}

impl Failure {
    /// Create a failure.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The generic, non-leaking failure for engine and persistence problems.
    #[must_use]
    pub fn system(kind: FailureKind) -> Self {
        Self::new(kind, SYSTEM_FAILURE_MESSAGE)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of handling a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The command was handled; carries the entity specific reply.
    Success(serde_json::Value),
    /// The command failed.
    Failure(Failure),
}

/// The single response to a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Message id of the command this responds to.
    pub message_id: MessageId,
    /// Entity that handled (or refused) the command.
    pub entity_id: EntityId,
    /// Last-modified stamp of the entity, or `None` if no live entity was reached.
    pub last_modified: Option<DateTime<Utc>>,
    /// What happened.
    pub outcome: Outcome,
}

impl ModelResponse {
    /// A success response.
    #[must_use]
    pub const fn success(
        message_id: MessageId,
        entity_id: EntityId,
        last_modified: Option<DateTime<Utc>>,
        reply: serde_json::Value,
    ) -> Self {
        Self {
            message_id,
            entity_id,
            last_modified,
            outcome: Outcome::Success(reply),
        }
    }

    /// A failure response.
    #[must_use]
    pub const fn failure(
        message_id: MessageId,
        entity_id: EntityId,
        last_modified: Option<DateTime<Utc>>,
        failure: Failure,
    ) -> Self {
        Self {
            message_id,
            entity_id,
            last_modified,
            outcome: Outcome::Failure(failure),
        }
    }

    /// Whether the command succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// The failure, if any.
    #[must_use]
    pub const fn failure_ref(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Failure(failure) => Some(failure),
            Outcome::Success(_) => None,
        }
    }

    /// The failure kind, if any.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_ref().map(|f| f.kind)
    }

    /// The success reply, if any.
    #[must_use]
    pub const fn reply(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// Manifest tag of this response.
    #[must_use]
    pub const fn manifest(&self) -> &'static str {
        match &self.outcome {
            Outcome::Success(_) => "Success",
            Outcome::Failure(failure) => failure.kind.manifest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests_distinguish_kinds() {
        let id = MessageId::new();
        let ok = ModelResponse::success(id, EntityId::new("e"), None, serde_json::json!({}));
        assert_eq!(ok.manifest(), "Success");
        assert!(ok.is_success());

        let failed = ModelResponse::failure(
            id,
            EntityId::new("e"),
            None,
            Failure::new(FailureKind::Validation, "bad"),
        );
        assert_eq!(failed.manifest(), "ValidationFailure");
        assert_eq!(failed.failure_kind(), Some(FailureKind::Validation));
        assert!(failed.reply().is_none());
    }

    #[test]
    fn system_failure_does_not_leak() {
        let failure = Failure::system(FailureKind::Persistence);
        assert_eq!(failure.message, SYSTEM_FAILURE_MESSAGE);
        assert!(!FailureKind::Persistence.is_caller_error());
        assert!(FailureKind::Authorization.is_caller_error());
    }
}
