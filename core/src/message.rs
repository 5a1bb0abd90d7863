//! Commands and the metadata that travels with them.
//!
//! A command is an immutable request addressed to one entity. It is wrapped in a
//! [`CommandEnvelope`] carrying the target entity, the tenant, the acting user and
//! a [`MessageId`] used to correlate the single response the entity sends back.

use crate::entity::EntityId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Correlation id of a command and its response.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random message id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user on whose behalf a command is executed.
///
/// Role evaluation itself (multi-tenant authorization rules) lives outside the
/// engine; entities only consult the roles carried here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User id.
    pub id: String,
    /// Roles the user holds within the tenant.
    pub roles: BTreeSet<String>,
    /// Tenant the user acts in.
    pub tenant: String,
}

impl UserIdentity {
    /// Create a user without roles.
    #[must_use]
    pub fn new(id: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: BTreeSet::new(),
            tenant: tenant.into(),
        }
    }

    /// Add a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Whether the user holds the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// A command type handled by one entity type.
///
/// Commands are serialized with serde's externally tagged enum representation;
/// the variant name is the command's manifest.
pub trait ModelCommand: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Whether this command creates the entity.
    ///
    /// A bootstrap command is accepted exactly once per entity id.
    fn is_bootstrap(&self) -> bool;

    /// Short human readable description used in logs.
    fn description(&self) -> String {
        format!("{self:?}")
    }
}

/// A command together with its routing and identity metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope<C> {
    /// Correlation id for the response.
    pub message_id: MessageId,
    /// Target entity.
    pub entity_id: EntityId,
    /// Tenant the command runs in.
    pub tenant: String,
    /// Acting user.
    pub user: UserIdentity,
    /// The command payload.
    pub command: C,
}

impl<C> CommandEnvelope<C> {
    /// Wrap a command for the given entity with a fresh message id.
    ///
    /// The tenant is taken from the user.
    #[must_use]
    pub fn new(entity_id: impl Into<EntityId>, user: UserIdentity, command: C) -> Self {
        Self {
            message_id: MessageId::new(),
            entity_id: entity_id.into(),
            tenant: user.tenant.clone(),
            user,
            command,
        }
    }

    /// Replace the message id.
    #[must_use]
    pub const fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    /// Replace the command payload, keeping the metadata.
    pub fn map<D>(self, f: impl FnOnce(C) -> D) -> CommandEnvelope<D> {
        CommandEnvelope {
            message_id: self.message_id,
            entity_id: self.entity_id,
            tenant: self.tenant,
            user: self.user,
            command: f(self.command),
        }
    }
}

/// A payload in its wire form: manifest tag plus structured body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodedMessage {
    /// Manifest tag, `Name` or `Name;version`.
    pub manifest: String,
    /// Structured payload.
    pub payload: serde_json::Value,
}
