//! Commands of the tenant entity.

use crate::user::TenantUser;
use casework_core::codec::ManifestSpec;
use casework_core::message::ModelCommand;
use serde::{Deserialize, Serialize};

/// A request to a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantCommand {
    /// Create the tenant; platform owners only.
    CreateTenant {
        /// Initial users, at least one of them an enabled owner.
        users: Vec<TenantUser>,
    },
    /// Add a user, or change an existing one.
    SetTenantUser {
        /// The user with its new roles and flags.
        user: TenantUser,
    },
    /// Remove a user.
    RemoveTenantUser {
        /// User id.
        user_id: String,
    },
    /// Replace every user of the tenant.
    ReplaceTenant {
        /// The new users.
        users: Vec<TenantUser>,
    },
    /// Disable the tenant; platform owners only.
    DisableTenant,
    /// Enable a disabled tenant; platform owners only.
    EnableTenant,
}

impl TenantCommand {
    /// Manifests of every tenant command.
    pub const MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("CreateTenant"),
        ManifestSpec::new("SetTenantUser"),
        ManifestSpec::new("RemoveTenantUser"),
        ManifestSpec::new("ReplaceTenant"),
        ManifestSpec::new("DisableTenant"),
        ManifestSpec::new("EnableTenant"),
    ];

    /// Commands reserved to platform owners.
    #[must_use]
    pub const fn is_platform_command(&self) -> bool {
        matches!(self, Self::CreateTenant { .. } | Self::DisableTenant | Self::EnableTenant)
    }
}

impl ModelCommand for TenantCommand {
    fn is_bootstrap(&self) -> bool {
        matches!(self, Self::CreateTenant { .. })
    }

    fn description(&self) -> String {
        match self {
            Self::CreateTenant { users } => format!("CreateTenant({} users)", users.len()),
            Self::SetTenantUser { user } => format!("SetTenantUser({})", user.user_id),
            Self::RemoveTenantUser { user_id } => format!("RemoveTenantUser({user_id})"),
            Self::ReplaceTenant { users } => format!("ReplaceTenant({} users)", users.len()),
            Self::DisableTenant => "DisableTenant".to_string(),
            Self::EnableTenant => "EnableTenant".to_string(),
        }
    }
}
