//! Group members.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A user in a consent group, with the roles the group grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentGroupMember {
    /// User id.
    pub user_id: String,
    /// Roles within the group.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Owners may change the group.
    #[serde(default)]
    pub is_owner: bool,
}

impl ConsentGroupMember {
    /// A member without roles or ownership.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: BTreeSet::new(),
            is_owner: false,
        }
    }

    /// An owner without roles.
    #[must_use]
    pub fn owner(user_id: impl Into<String>) -> Self {
        Self {
            is_owner: true,
            ..Self::new(user_id)
        }
    }

    /// Add a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Roles this member holds that `next` no longer has.
    #[must_use]
    pub fn roles_removed(&self, next: &Self) -> BTreeSet<String> {
        self.roles.difference(&next.roles).cloned().collect()
    }
}
