//! The tenant entity: its users, their roles and the platform switch.

use crate::command::TenantCommand;
use crate::event::TenantEvent;
use crate::user::TenantUser;
use casework_core::codec::ManifestSpec;
use casework_core::entity::EntityId;
use casework_core::error::{ApplyError, CommandError};
use casework_core::event::EventMetadata;
use casework_runtime::{ModelEntity, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

/// Role that allows creating, disabling and enabling tenants.
pub const PLATFORM_OWNER_ROLE: &str = "platform-owner";

/// A tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tenant {
    name: String,
    created: bool,
    disabled: bool,
    users: BTreeMap<String, TenantUser>,
}

impl Tenant {
    /// Tenant name (the entity id).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the tenant was created.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.created
    }

    /// Whether the platform disabled the tenant.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Users ordered by id.
    pub fn users(&self) -> impl Iterator<Item = &TenantUser> {
        self.users.values()
    }

    /// A user by id.
    #[must_use]
    pub fn user(&self, user_id: &str) -> Option<&TenantUser> {
        self.users.get(user_id)
    }

    /// Ids of the enabled owners.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.users
            .values()
            .filter(|user| user.is_active_owner())
            .map(|user| user.user_id.as_str())
    }

    /// Whether the user is an enabled owner.
    #[must_use]
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(TenantUser::is_active_owner)
    }

    fn is_last_owner(&self, user_id: &str) -> bool {
        self.is_owner(user_id) && self.owners().count() == 1
    }

    fn check_users(users: &[TenantUser]) -> Result<(), CommandError> {
        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<&str> = users
            .iter()
            .map(|user| user.user_id.as_str())
            .filter(|id| !seen.insert(*id))
            .collect();
        if !duplicates.is_empty() {
            return Err(CommandError::invalid(format!(
                "Cannot set tenant with user duplicates. Found multiple entries for users {duplicates:?}"
            )));
        }
        if users.iter().any(TenantUser::is_active_owner) {
            Ok(())
        } else {
            Err(CommandError::invalid("Cannot set tenant without active tenant owners"))
        }
    }

    fn last_owner_error() -> CommandError {
        CommandError::invalid(
            "Cannot remove tenant ownership or disable the account. There must be at least one tenant owner.",
        )
    }

    fn set_user(&mut self, user: TenantUser, tx: &mut Transaction<Self>) -> Result<(), CommandError> {
        let event = match self.users.get(&user.user_id) {
            None => TenantEvent::TenantUserAdded { user },
            Some(existing) if *existing == user => {
                tracing::debug!(tenant = %self.name, user_id = %user.user_id, "User unchanged");
                return Ok(());
            }
            Some(existing) => TenantEvent::TenantUserChanged {
                roles_removed: existing.roles_removed(&user),
                user,
            },
        };
        tx.add_event(self, event)
    }

    fn remove_user(&mut self, user_id: String, tx: &mut Transaction<Self>) -> Result<(), CommandError> {
        if self.users.contains_key(&user_id) {
            tx.add_event(self, TenantEvent::TenantUserRemoved { user_id })?;
        }
        Ok(())
    }

    fn reply(&self) -> Value {
        json!({ "tenant": self.name, "users": self.users.len(), "disabled": self.disabled })
    }
}

impl ModelEntity for Tenant {
    const ENTITY_TYPE: &'static str = "Tenant";
    const COMMAND_MANIFESTS: &'static [ManifestSpec] = TenantCommand::MANIFESTS;
    const EVENT_MANIFESTS: &'static [ManifestSpec] = TenantEvent::MANIFESTS;

    type Command = TenantCommand;
    type Event = TenantEvent;
    type Settings = ();

    fn create(id: &EntityId) -> Self {
        Self {
            name: id.as_str().to_string(),
            created: false,
            disabled: false,
            users: BTreeMap::new(),
        }
    }

    fn validate(&self, command: &TenantCommand, tx: &Transaction<Self>) -> Result<(), CommandError> {
        if command.is_platform_command() && !tx.user().has_role(PLATFORM_OWNER_ROLE) {
            return Err(CommandError::unauthorized("Only platform owners can perform this action"));
        }
        if let TenantCommand::CreateTenant { users } = command {
            if self.exists() {
                return Err(CommandError::invalid(format!("Tenant '{}' already exists", self.name)));
            }
            return Self::check_users(users);
        }
        if !self.exists() {
            return Err(CommandError::invalid("Not allowed to access this tenant"));
        }
        if command.is_platform_command() {
            return Ok(());
        }

        if self.disabled {
            return Err(CommandError::invalid(format!("Tenant '{}' is disabled", self.name)));
        }
        if !self.is_owner(&tx.user().id) {
            return Err(CommandError::unauthorized(
                "You do not have the privileges to perform this action",
            ));
        }

        match command {
            TenantCommand::SetTenantUser { user } => {
                if !user.is_active_owner() && self.is_last_owner(&user.user_id) {
                    return Err(Self::last_owner_error());
                }
                Ok(())
            }
            TenantCommand::RemoveTenantUser { user_id } => {
                if !self.users.contains_key(user_id) {
                    return Err(CommandError::invalid(format!("User {user_id} is not part of the tenant")));
                }
                if self.is_last_owner(user_id) {
                    return Err(Self::last_owner_error());
                }
                Ok(())
            }
            TenantCommand::ReplaceTenant { users } => Self::check_users(users),
            TenantCommand::CreateTenant { .. } | TenantCommand::DisableTenant | TenantCommand::EnableTenant => Ok(()),
        }
    }

    fn execute(&mut self, command: TenantCommand, tx: &mut Transaction<Self>) -> Result<Value, CommandError> {
        match command {
            TenantCommand::CreateTenant { users } => {
                tracing::info!(tenant = %self.name, users = users.len(), "Creating tenant");
                tx.add_event(self, TenantEvent::TenantCreated)?;
                for user in users {
                    self.set_user(user, tx)?;
                }
            }
            TenantCommand::SetTenantUser { user } => self.set_user(user, tx)?,
            TenantCommand::RemoveTenantUser { user_id } => self.remove_user(user_id, tx)?,
            TenantCommand::ReplaceTenant { users } => {
                let leaving: Vec<String> = self
                    .users
                    .keys()
                    .filter(|user_id| !users.iter().any(|user| &user.user_id == *user_id))
                    .cloned()
                    .collect();
                for user_id in leaving {
                    self.remove_user(user_id, tx)?;
                }
                for user in users {
                    self.set_user(user, tx)?;
                }
            }
            TenantCommand::DisableTenant => {
                if !self.disabled {
                    tracing::info!(tenant = %self.name, "Disabling tenant");
                    tx.add_event(self, TenantEvent::TenantDisabled)?;
                }
            }
            TenantCommand::EnableTenant => {
                if self.disabled {
                    tracing::info!(tenant = %self.name, "Enabling tenant");
                    tx.add_event(self, TenantEvent::TenantEnabled)?;
                }
            }
        }
        Ok(self.reply())
    }

    fn apply(&mut self, event: &TenantEvent, _metadata: &EventMetadata) -> Result<(), ApplyError> {
        match event {
            TenantEvent::TenantCreated => {
                if self.created {
                    return Err(ApplyError::Inconsistent(format!("Tenant '{}' created twice", self.name)));
                }
                self.created = true;
            }
            TenantEvent::TenantUserAdded { user } => {
                self.users.insert(user.user_id.clone(), user.clone());
            }
            TenantEvent::TenantUserChanged { user, .. } => {
                let Some(existing) = self.users.get_mut(&user.user_id) else {
                    return Err(ApplyError::UnknownReference {
                        what: "user",
                        id: user.user_id.clone(),
                    });
                };
                *existing = user.clone();
            }
            TenantEvent::TenantUserRemoved { user_id } => {
                if self.users.remove(user_id).is_none() {
                    return Err(ApplyError::UnknownReference {
                        what: "user",
                        id: user_id.clone(),
                    });
                }
            }
            TenantEvent::TenantDisabled => self.disabled = true,
            TenantEvent::TenantEnabled => self.disabled = false,
        }
        Ok(())
    }
}
