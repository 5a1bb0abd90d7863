//! Events of the tenant entity.

use crate::user::TenantUser;
use casework_core::codec::ManifestSpec;
use casework_core::event::ModelEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Something that happened to a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantEvent {
    /// The tenant was created.
    TenantCreated,
    /// A user was registered.
    TenantUserAdded {
        /// The new user.
        user: TenantUser,
    },
    /// A user's roles, ownership or account changed.
    TenantUserChanged {
        /// The user as it is now.
        user: TenantUser,
        /// Roles the user lost.
        roles_removed: BTreeSet<String>,
    },
    /// A user was removed.
    TenantUserRemoved {
        /// User id of the former user.
        user_id: String,
    },
    /// The tenant was disabled.
    TenantDisabled,
    /// The tenant was enabled again.
    TenantEnabled,
}

impl ModelEvent for TenantEvent {}

impl TenantEvent {
    /// Manifests of every tenant event.
    pub const MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("TenantCreated"),
        ManifestSpec::new("TenantUserAdded"),
        ManifestSpec::new("TenantUserChanged"),
        ManifestSpec::new("TenantUserRemoved"),
        ManifestSpec::new("TenantDisabled"),
        ManifestSpec::new("TenantEnabled"),
    ];
}
