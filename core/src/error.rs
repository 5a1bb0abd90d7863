//! Errors raised by entity code while validating, executing and folding.

use crate::response::{Failure, FailureKind};
use thiserror::Error;

/// Failure raised by an entity's `validate` or `execute`.
///
/// Each variant maps to exactly one [`FailureKind`]; the command pipeline turns
/// the error into the matching failure response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The acting user is not allowed to perform the command.
    #[error("{0}")]
    Unauthorized(String),

    /// The command is invalid against the current state.
    #[error("{0}")]
    Invalid(String),

    /// Unexpected internal failure.
    #[error("Internal failure: {0}")]
    Internal(String),
}

impl CommandError {
    /// Shorthand for [`CommandError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Shorthand for [`CommandError::Unauthorized`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Failure kind this error maps to.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized(_) => FailureKind::Authorization,
            Self::Invalid(_) => FailureKind::Validation,
            Self::Internal(_) => FailureKind::Engine,
        }
    }

    /// The failure handed to the caller.
    ///
    /// Internal failures are replaced by the generic system message.
    #[must_use]
    pub fn to_failure(&self) -> Failure {
        match self {
            Self::Unauthorized(message) | Self::Invalid(message) => {
                Failure::new(self.kind(), message.clone())
            }
            Self::Internal(_) => Failure::system(FailureKind::Engine),
        }
    }
}

impl From<ApplyError> for CommandError {
    fn from(error: ApplyError) -> Self {
        Self::Internal(error.to_string())
    }
}

/// Failure while folding an event into entity state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The event refers to something the state does not know.
    #[error("Event refers to unknown {what} '{id}'")]
    UnknownReference {
        /// Kind of element.
        what: &'static str,
        /// Identifier that could not be resolved.
        id: String,
    },

    /// The event contradicts the current state.
    #[error("Inconsistent event: {0}")]
    Inconsistent(String),
}
