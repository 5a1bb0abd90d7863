//! Commands of the consent group entity.

use crate::member::ConsentGroupMember;
use casework_core::codec::ManifestSpec;
use casework_core::message::ModelCommand;
use serde::{Deserialize, Serialize};

/// A request to a consent group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentGroupCommand {
    /// Create the group; at least one member must be an owner.
    CreateConsentGroup {
        /// Initial members.
        members: Vec<ConsentGroupMember>,
    },
    /// Add a member, or change an existing one.
    SetConsentGroupMember {
        /// The member with its new roles and ownership.
        member: ConsentGroupMember,
    },
    /// Remove a member.
    RemoveConsentGroupMember {
        /// User id of the member.
        user_id: String,
    },
    /// Replace the whole membership.
    ReplaceConsentGroup {
        /// The new members.
        members: Vec<ConsentGroupMember>,
    },
}

impl ConsentGroupCommand {
    /// Manifests of every consent group command.
    pub const MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("CreateConsentGroup"),
        ManifestSpec::new("SetConsentGroupMember"),
        ManifestSpec::new("RemoveConsentGroupMember"),
        ManifestSpec::new("ReplaceConsentGroup"),
    ];
}

impl ModelCommand for ConsentGroupCommand {
    fn is_bootstrap(&self) -> bool {
        matches!(self, Self::CreateConsentGroup { .. })
    }

    fn description(&self) -> String {
        match self {
            Self::CreateConsentGroup { members } => format!("CreateConsentGroup({} members)", members.len()),
            Self::SetConsentGroupMember { member } => format!("SetConsentGroupMember({})", member.user_id),
            Self::RemoveConsentGroupMember { user_id } => format!("RemoveConsentGroupMember({user_id})"),
            Self::ReplaceConsentGroup { members } => format!("ReplaceConsentGroup({} members)", members.len()),
        }
    }
}
