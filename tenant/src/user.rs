//! Users registered in a tenant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const fn enabled_by_default() -> bool {
    true
}

/// A user of a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUser {
    /// User id.
    pub user_id: String,
    /// Roles within the tenant.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Owners manage the users of the tenant.
    #[serde(default)]
    pub is_owner: bool,
    /// Disabled accounts keep their roles but lose their rights.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
}

impl TenantUser {
    /// An enabled user without roles.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: BTreeSet::new(),
            is_owner: false,
            enabled: true,
            name: None,
            email: None,
        }
    }

    /// An enabled owner without roles.
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

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Disable the account.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// An owner whose account is enabled.
    #[must_use]
    pub const fn is_active_owner(&self) -> bool {
        self.is_owner && self.enabled
    }

    /// Roles this user holds that `next` no longer has.
    #[must_use]
    pub fn roles_removed(&self, next: &Self) -> BTreeSet<String> {
        self.roles.difference(&next.roles).cloned().collect()
    }
}
