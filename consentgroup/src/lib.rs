//! # Casework Consent Groups
//!
//! A consent group is a small entity listing users, possibly from other
//! tenants, that may take part in a case. Only owners change the group, and a
//! group always keeps at least one member and one owner.
//!
//! ## Example
//!
//! ```ignore
//! use casework_consentgroup::{ConsentGroup, ConsentGroupCommand, ConsentGroupMember};
//! use casework_testing::EntityTest;
//!
//! let mut test = EntityTest::<ConsentGroup>::new("group-1");
//! test.execute(ConsentGroupCommand::CreateConsentGroup {
//!     members: vec![ConsentGroupMember::owner("tester")],
//! })
//! .expect_success();
//! test.execute(ConsentGroupCommand::SetConsentGroupMember {
//!     member: ConsentGroupMember::new("alice").with_role("reviewer"),
//! })
//! .expect_success();
//! assert_eq!(test.entity().members().count(), 2);
//! ```

/// Group members
pub mod member;

/// Commands
pub mod command;

/// Events
pub mod event;

/// The consent group entity
pub mod group;

pub use command::ConsentGroupCommand;
pub use event::ConsentGroupEvent;
pub use group::ConsentGroup;
pub use member::ConsentGroupMember;
