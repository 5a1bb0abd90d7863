//! Consent group membership rules.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use casework_consentgroup::{ConsentGroup, ConsentGroupCommand, ConsentGroupEvent, ConsentGroupMember};
use casework_core::message::UserIdentity;
use casework_core::response::FailureKind;
use casework_runtime::RecoveryOutcome;
use casework_testing::{EntityTest, init_tracing};
use std::collections::BTreeSet;

fn group() -> EntityTest<ConsentGroup> {
    init_tracing();
    EntityTest::<ConsentGroup>::new("group-1").given(ConsentGroupCommand::CreateConsentGroup {
        members: vec![
            ConsentGroupMember::owner("tester"),
            ConsentGroupMember::new("alice").with_role("reviewer"),
        ],
    })
}

fn set(member: ConsentGroupMember) -> ConsentGroupCommand {
    ConsentGroupCommand::SetConsentGroupMember { member }
}

fn remove(user_id: &str) -> ConsentGroupCommand {
    ConsentGroupCommand::RemoveConsentGroupMember {
        user_id: user_id.into(),
    }
}

#[test]
fn creation_records_tenant_and_members() {
    let mut test = EntityTest::<ConsentGroup>::new("group-1");
    let step = test.execute(ConsentGroupCommand::CreateConsentGroup {
        members: vec![ConsentGroupMember::owner("tester"), ConsentGroupMember::new("alice")],
    });

    assert_eq!(step.expect_success()["members"], 2);
    assert_eq!(
        step.domain_events()[0],
        &ConsentGroupEvent::ConsentGroupCreated { tenant: "test".into() }
    );
    assert_eq!(test.entity().tenant(), Some("test"));
    assert_eq!(test.entity().owners().collect::<Vec<_>>(), vec!["tester"]);
}

#[test]
fn a_group_needs_an_owner() {
    let mut test = EntityTest::<ConsentGroup>::new("group-1");
    let failure = test
        .execute(ConsentGroupCommand::CreateConsentGroup {
            members: vec![ConsentGroupMember::new("alice")],
        })
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("owner"), "{failure}");
    assert!(!test.entity().exists());
}

#[test]
fn duplicate_members_are_refused() {
    let mut test = EntityTest::<ConsentGroup>::new("group-1");
    test.execute(ConsentGroupCommand::CreateConsentGroup {
        members: vec![ConsentGroupMember::owner("tester"), ConsentGroupMember::new("tester")],
    })
    .expect_failure(FailureKind::Validation);
}

#[test]
fn a_group_is_created_once() {
    let mut test = group();
    test.execute(ConsentGroupCommand::CreateConsentGroup {
        members: vec![ConsentGroupMember::owner("tester")],
    })
    .expect_failure(FailureKind::Validation);
}

#[test]
fn only_owners_change_the_group() {
    let mut test = group();
    test.execute_as(UserIdentity::new("alice", "test"), set(ConsentGroupMember::owner("alice")))
        .expect_failure(FailureKind::Authorization);
    assert!(!test.entity().is_owner("alice"));
}

#[test]
fn changing_a_member_reports_lost_roles() {
    let mut test = group();
    let step = test.execute(set(ConsentGroupMember::new("alice").with_role("approver")));

    step.expect_success();
    assert_eq!(
        step.domain_events(),
        vec![&ConsentGroupEvent::ConsentGroupMemberChanged {
            member: ConsentGroupMember::new("alice").with_role("approver"),
            roles_removed: BTreeSet::from(["reviewer".to_string()]),
        }]
    );
}

#[test]
fn identical_members_produce_no_event() {
    let mut test = group();
    let step = test.execute(set(ConsentGroupMember::new("alice").with_role("reviewer")));
    step.expect_success();
    assert!(step.domain_events().is_empty());
}

#[test]
fn the_last_owner_stays() {
    let mut test = group();
    let failure = test
        .execute(set(ConsentGroupMember::new("tester")))
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("at least one group owner"), "{failure}");

    test.execute(remove("tester")).expect_failure(FailureKind::Validation);

    test.execute(set(ConsentGroupMember::owner("alice"))).expect_success();
    test.execute(remove("tester")).expect_success();
    assert_eq!(test.entity().owners().collect::<Vec<_>>(), vec!["alice"]);
}

#[test]
fn the_last_member_stays() {
    let mut test = EntityTest::<ConsentGroup>::new("group-1").given(ConsentGroupCommand::CreateConsentGroup {
        members: vec![ConsentGroupMember::owner("tester")],
    });
    let failure = test
        .execute(remove("tester"))
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("at least one member"), "{failure}");
}

#[test]
fn unknown_members_cannot_be_removed() {
    let mut test = group();
    test.execute(remove("nobody")).expect_failure(FailureKind::Validation);
}

#[test]
fn replacing_the_group_removes_missing_members() {
    let mut test = group();
    let step = test.execute(ConsentGroupCommand::ReplaceConsentGroup {
        members: vec![
            ConsentGroupMember::owner("tester"),
            ConsentGroupMember::new("bob").with_role("reviewer"),
        ],
    });

    step.expect_success();
    assert_eq!(
        step.domain_events(),
        vec![
            &ConsentGroupEvent::ConsentGroupMemberRemoved {
                user_id: "alice".into()
            },
            &ConsentGroupEvent::ConsentGroupMemberAdded {
                member: ConsentGroupMember::new("bob").with_role("reviewer"),
            },
        ]
    );
    let members: Vec<_> = test.entity().members().map(|m| m.user_id.as_str()).collect();
    assert_eq!(members, vec!["bob", "tester"]);
}

#[test]
fn replacement_keeps_an_owner() {
    let mut test = group();
    test.execute(ConsentGroupCommand::ReplaceConsentGroup {
        members: vec![ConsentGroupMember::new("alice")],
    })
    .expect_failure(FailureKind::Validation);
}

#[test]
fn members_from_other_tenants_are_allowed_but_their_commands_are_not() {
    let mut test = group();
    test.execute(set(ConsentGroupMember::owner("zed"))).expect_success();

    test.execute_as(UserIdentity::new("zed", "elsewhere"), remove("alice"))
        .expect_failure(FailureKind::Authorization);
    assert!(test.entity().member("alice").is_some());
}

#[test]
fn the_group_replays_from_its_history() {
    let mut test = group();
    test.execute(set(ConsentGroupMember::owner("alice"))).expect_success();
    test.execute(remove("tester")).expect_success();

    let (outcome, replayed) = test.replay();
    assert_eq!(outcome, RecoveryOutcome::Ready);
    assert_eq!(
        serde_json::to_value(&replayed.entity).unwrap(),
        serde_json::to_value(test.entity()).unwrap()
    );
}
