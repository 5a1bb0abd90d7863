//! The consent group entity and its membership rules.

use crate::command::ConsentGroupCommand;
use crate::event::ConsentGroupEvent;
use crate::member::ConsentGroupMember;
use casework_core::codec::ManifestSpec;
use casework_core::entity::EntityId;
use casework_core::error::{ApplyError, CommandError};
use casework_core::event::EventMetadata;
use casework_runtime::{ModelEntity, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

/// A consent group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsentGroup {
    id: String,
    tenant: Option<String>,
    members: BTreeMap<String, ConsentGroupMember>,
}

impl ConsentGroup {
    /// Whether the group was created.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.tenant.is_some()
    }

    /// Tenant owning the group.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Members ordered by user id.
    pub fn members(&self) -> impl Iterator<Item = &ConsentGroupMember> {
        self.members.values()
    }

    /// A member by user id.
    #[must_use]
    pub fn member(&self, user_id: &str) -> Option<&ConsentGroupMember> {
        self.members.get(user_id)
    }

    /// User ids of the owners.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.members
            .values()
            .filter(|member| member.is_owner)
            .map(|member| member.user_id.as_str())
    }

    /// Whether the user owns the group.
    #[must_use]
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.members.get(user_id).is_some_and(|member| member.is_owner)
    }

    fn is_last_owner(&self, user_id: &str) -> bool {
        self.is_owner(user_id) && self.owners().count() == 1
    }

    fn check_members(members: &[ConsentGroupMember]) -> Result<(), CommandError> {
        let mut seen = BTreeSet::new();
        for member in members {
            if !seen.insert(member.user_id.as_str()) {
                return Err(CommandError::invalid(format!(
                    "User '{}' is listed more than once",
                    member.user_id
                )));
            }
        }
        if members.iter().any(|member| member.is_owner) {
            Ok(())
        } else {
            Err(CommandError::invalid("A consent group needs at least one owner"))
        }
    }

    fn set_member(&mut self, member: ConsentGroupMember, tx: &mut Transaction<Self>) -> Result<(), CommandError> {
        let event = match self.members.get(&member.user_id) {
            None => ConsentGroupEvent::ConsentGroupMemberAdded { member },
            Some(existing) if *existing == member => {
                tracing::debug!(group_id = %self.id, user_id = %member.user_id, "Member unchanged");
                return Ok(());
            }
            Some(existing) => ConsentGroupEvent::ConsentGroupMemberChanged {
                roles_removed: existing.roles_removed(&member),
                member,
            },
        };
        tx.add_event(self, event)
    }

    fn remove_member(&mut self, user_id: String, tx: &mut Transaction<Self>) -> Result<(), CommandError> {
        if self.members.contains_key(&user_id) {
            tx.add_event(self, ConsentGroupEvent::ConsentGroupMemberRemoved { user_id })?;
        }
        Ok(())
    }

    fn reply(&self) -> Value {
        json!({ "groupId": self.id, "members": self.members.len() })
    }
}

impl ModelEntity for ConsentGroup {
    const ENTITY_TYPE: &'static str = "ConsentGroup";
    const COMMAND_MANIFESTS: &'static [ManifestSpec] = ConsentGroupCommand::MANIFESTS;
    const EVENT_MANIFESTS: &'static [ManifestSpec] = ConsentGroupEvent::MANIFESTS;

    type Command = ConsentGroupCommand;
    type Event = ConsentGroupEvent;
    type Settings = ();

    fn create(id: &EntityId) -> Self {
        Self {
            id: id.as_str().to_string(),
            tenant: None,
            members: BTreeMap::new(),
        }
    }

    fn validate(&self, command: &ConsentGroupCommand, tx: &Transaction<Self>) -> Result<(), CommandError> {
        if let ConsentGroupCommand::CreateConsentGroup { members } = command {
            if self.exists() {
                return Err(CommandError::invalid(format!("Consent group '{}' already exists", self.id)));
            }
            return Self::check_members(members);
        }

        if !self.exists() {
            return Err(CommandError::invalid("Not allowed to access this consent group"));
        }
        if !self.is_owner(&tx.user().id) {
            return Err(CommandError::unauthorized(
                "You do not have the privileges to perform this action",
            ));
        }

        match command {
            ConsentGroupCommand::CreateConsentGroup { .. } => Ok(()),
            ConsentGroupCommand::SetConsentGroupMember { member } => {
                if !member.is_owner && self.is_last_owner(&member.user_id) {
                    return Err(CommandError::invalid(format!(
                        "Cannot remove group ownership of user {}. There must be at least one group owner.",
                        member.user_id
                    )));
                }
                Ok(())
            }
            ConsentGroupCommand::RemoveConsentGroupMember { user_id } => {
                if !self.members.contains_key(user_id) {
                    return Err(CommandError::invalid(format!("User {user_id} is not a member of the group")));
                }
                if self.members.len() == 1 {
                    return Err(CommandError::invalid(format!(
                        "Cannot remove group membership for user {user_id}. There must be at least one member."
                    )));
                }
                if self.is_last_owner(user_id) {
                    return Err(CommandError::invalid(format!(
                        "Cannot remove group ownership of user {user_id}. There must be at least one group owner."
                    )));
                }
                Ok(())
            }
            ConsentGroupCommand::ReplaceConsentGroup { members } => Self::check_members(members),
        }
    }

    fn execute(
        &mut self,
        command: ConsentGroupCommand,
        tx: &mut Transaction<Self>,
    ) -> Result<Value, CommandError> {
        match command {
            ConsentGroupCommand::CreateConsentGroup { members } => {
                let tenant = tx.meta().tenant.clone();
                tracing::info!(group_id = %self.id, %tenant, "Creating consent group");
                tx.add_event(self, ConsentGroupEvent::ConsentGroupCreated { tenant })?;
                for member in members {
                    self.set_member(member, tx)?;
                }
            }
            ConsentGroupCommand::SetConsentGroupMember { member } => self.set_member(member, tx)?,
            ConsentGroupCommand::RemoveConsentGroupMember { user_id } => self.remove_member(user_id, tx)?,
            ConsentGroupCommand::ReplaceConsentGroup { members } => {
                let leaving: Vec<String> = self
                    .members
                    .keys()
                    .filter(|user_id| !members.iter().any(|member| &member.user_id == *user_id))
                    .cloned()
                    .collect();
                for user_id in leaving {
                    self.remove_member(user_id, tx)?;
                }
                for member in members {
                    self.set_member(member, tx)?;
                }
            }
        }
        Ok(self.reply())
    }

    fn apply(&mut self, event: &ConsentGroupEvent, _metadata: &EventMetadata) -> Result<(), ApplyError> {
        match event {
            ConsentGroupEvent::ConsentGroupCreated { tenant } => {
                if self.exists() {
                    return Err(ApplyError::Inconsistent(format!("Consent group '{}' created twice", self.id)));
                }
                self.tenant = Some(tenant.clone());
            }
            ConsentGroupEvent::ConsentGroupMemberAdded { member } => {
                self.members.insert(member.user_id.clone(), member.clone());
            }
            ConsentGroupEvent::ConsentGroupMemberChanged { member, .. } => {
                let Some(existing) = self.members.get_mut(&member.user_id) else {
                    return Err(ApplyError::UnknownReference {
                        what: "member",
                        id: member.user_id.clone(),
                    });
                };
                *existing = member.clone();
            }
            ConsentGroupEvent::ConsentGroupMemberRemoved { user_id } => {
                if self.members.remove(user_id).is_none() {
                    return Err(ApplyError::UnknownReference {
                        what: "member",
                        id: user_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
