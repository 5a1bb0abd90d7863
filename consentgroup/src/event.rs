//! Events of the consent group entity.

use crate::member::ConsentGroupMember;
use casework_core::codec::ManifestSpec;
use casework_core::event::ModelEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Something that happened to a consent group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentGroupEvent {
    /// The group was created.
    ConsentGroupCreated {
        /// Tenant owning the group.
        tenant: String,
    },
    /// A user joined.
    ConsentGroupMemberAdded {
        /// The new member.
        member: ConsentGroupMember,
    },
    /// A member's roles or ownership changed.
    ConsentGroupMemberChanged {
        /// The member as it is now.
        member: ConsentGroupMember,
        /// Roles the member lost.
        roles_removed: BTreeSet<String>,
    },
    /// A user left.
    ConsentGroupMemberRemoved {
        /// User id of the former member.
        user_id: String,
    },
}

impl ModelEvent for ConsentGroupEvent {}

impl ConsentGroupEvent {
    /// Manifests of every consent group event.
    pub const MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("ConsentGroupCreated"),
        ManifestSpec::new("ConsentGroupMemberAdded"),
        ManifestSpec::new("ConsentGroupMemberChanged"),
        ManifestSpec::new("ConsentGroupMemberRemoved"),
    ];
}
