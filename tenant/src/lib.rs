//! # Casework Tenants
//!
//! A tenant lists the users that may work with its cases, with their roles.
//! Tenant owners manage the users; platform owners create tenants and can
//! disable and re-enable them. A disabled tenant refuses user management until
//! it is enabled again.
//!
//! ## Example
//!
//! ```ignore
//! use casework_core::message::UserIdentity;
//! use casework_tenant::{Tenant, TenantCommand, TenantUser, PLATFORM_OWNER_ROLE};
//! use casework_testing::EntityTest;
//!
//! let platform = UserIdentity::new("admin", "test").with_role(PLATFORM_OWNER_ROLE);
//! let mut test = EntityTest::<Tenant>::new("test");
//! test.execute_as(platform, TenantCommand::CreateTenant {
//!     users: vec![TenantUser::owner("tester")],
//! })
//! .expect_success();
//! test.execute(TenantCommand::SetTenantUser {
//!     user: TenantUser::new("alice").with_role("reviewer"),
//! })
//! .expect_success();
//! assert!(test.entity().user("alice").is_some());
//! ```

/// Tenant users
pub mod user;

/// Commands
pub mod command;

/// Events
pub mod event;

/// The tenant entity
pub mod tenant;

pub use command::TenantCommand;
pub use event::TenantEvent;
pub use tenant::{PLATFORM_OWNER_ROLE, Tenant};
pub use user::TenantUser;
