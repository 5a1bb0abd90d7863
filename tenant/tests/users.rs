//! Tenant users, ownership and the platform switch.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use casework_core::message::UserIdentity;
use casework_core::response::FailureKind;
use casework_runtime::RecoveryOutcome;
use casework_tenant::{PLATFORM_OWNER_ROLE, Tenant, TenantCommand, TenantEvent, TenantUser};
use casework_testing::{EntityTest, init_tracing};
use std::collections::BTreeSet;

fn platform() -> UserIdentity {
    UserIdentity::new("admin", "test").with_role(PLATFORM_OWNER_ROLE)
}

fn tenant() -> EntityTest<Tenant> {
    init_tracing();
    EntityTest::<Tenant>::new("test")
        .with_user(platform())
        .given(TenantCommand::CreateTenant {
            users: vec![TenantUser::owner("tester"), TenantUser::new("alice").with_role("reviewer")],
        })
        .with_user(UserIdentity::new("tester", "test"))
}

fn set(user: TenantUser) -> TenantCommand {
    TenantCommand::SetTenantUser { user }
}

fn remove(user_id: &str) -> TenantCommand {
    TenantCommand::RemoveTenantUser {
        user_id: user_id.into(),
    }
}

#[test]
fn platform_owners_create_tenants() {
    let mut test = EntityTest::<Tenant>::new("test");
    let step = test.execute_as(
        platform(),
        TenantCommand::CreateTenant {
            users: vec![TenantUser::owner("tester").with_name("Tess")],
        },
    );

    assert_eq!(step.expect_success()["users"], 1);
    assert_eq!(
        step.domain_events(),
        vec![
            &TenantEvent::TenantCreated,
            &TenantEvent::TenantUserAdded {
                user: TenantUser::owner("tester").with_name("Tess"),
            },
        ]
    );
    assert!(test.entity().exists());
    assert_eq!(test.entity().owners().collect::<Vec<_>>(), vec!["tester"]);
}

#[test]
fn other_users_cannot_create_tenants() {
    let mut test = EntityTest::<Tenant>::new("test");
    test.execute(TenantCommand::CreateTenant {
        users: vec![TenantUser::owner("tester")],
    })
    .expect_failure(FailureKind::Authorization);
    assert!(!test.entity().exists());
}

#[test]
fn a_tenant_needs_an_active_owner() {
    let mut test = EntityTest::<Tenant>::new("test");
    let failure = test
        .execute_as(
            platform(),
            TenantCommand::CreateTenant {
                users: vec![TenantUser::owner("tester").disabled(), TenantUser::new("alice")],
            },
        )
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("active tenant owners"), "{failure}");
}

#[test]
fn duplicate_users_are_refused() {
    let mut test = EntityTest::<Tenant>::new("test");
    let failure = test
        .execute_as(
            platform(),
            TenantCommand::CreateTenant {
                users: vec![TenantUser::owner("tester"), TenantUser::new("tester")],
            },
        )
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("duplicates"), "{failure}");
}

#[test]
fn a_tenant_is_created_once() {
    let mut test = tenant();
    test.execute_as(
        platform(),
        TenantCommand::CreateTenant {
            users: vec![TenantUser::owner("tester")],
        },
    )
    .expect_failure(FailureKind::Validation);
}

#[test]
fn a_missing_tenant_refuses_user_changes() {
    let mut test = EntityTest::<Tenant>::new("test");
    test.execute(set(TenantUser::owner("tester")))
        .expect_failure(FailureKind::Validation);
}

#[test]
fn only_owners_manage_users() {
    let mut test = tenant();
    test.execute_as(UserIdentity::new("alice", "test"), set(TenantUser::owner("alice")))
        .expect_failure(FailureKind::Authorization);
    assert!(!test.entity().is_owner("alice"));
}

#[test]
fn disabled_owner_accounts_lose_their_rights() {
    let mut test = tenant();
    test.execute(set(TenantUser::owner("alice"))).expect_success();
    test.execute(set(TenantUser::owner("tester").disabled())).expect_success();

    test.execute(set(TenantUser::new("bob")))
        .expect_failure(FailureKind::Authorization);
    assert_eq!(test.entity().owners().collect::<Vec<_>>(), vec!["alice"]);
}

#[test]
fn changing_a_user_reports_lost_roles() {
    let mut test = tenant();
    let step = test.execute(set(TenantUser::new("alice").with_role("approver")));

    step.expect_success();
    assert_eq!(
        step.domain_events(),
        vec![&TenantEvent::TenantUserChanged {
            user: TenantUser::new("alice").with_role("approver"),
            roles_removed: BTreeSet::from(["reviewer".to_string()]),
        }]
    );
}

#[test]
fn identical_users_produce_no_event() {
    let mut test = tenant();
    let step = test.execute(set(TenantUser::new("alice").with_role("reviewer")));
    step.expect_success();
    assert!(step.domain_events().is_empty());
}

#[test]
fn the_last_owner_stays() {
    let mut test = tenant();
    let failure = test
        .execute(set(TenantUser::new("tester")))
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("at least one tenant owner"), "{failure}");

    test.execute(set(TenantUser::owner("tester").disabled()))
        .expect_failure(FailureKind::Validation);
    test.execute(remove("tester")).expect_failure(FailureKind::Validation);

    test.execute(set(TenantUser::owner("alice"))).expect_success();
    test.execute(remove("tester")).expect_success();
    assert_eq!(test.entity().owners().collect::<Vec<_>>(), vec!["alice"]);
}

#[test]
fn unknown_users_cannot_be_removed() {
    let mut test = tenant();
    test.execute(remove("nobody")).expect_failure(FailureKind::Validation);
}

#[test]
fn replacing_the_tenant_removes_missing_users() {
    let mut test = tenant();
    let step = test.execute(TenantCommand::ReplaceTenant {
        users: vec![TenantUser::owner("tester"), TenantUser::new("bob")],
    });

    step.expect_success();
    assert_eq!(
        step.domain_events(),
        vec![
            &TenantEvent::TenantUserRemoved { user_id: "alice".into() },
            &TenantEvent::TenantUserAdded {
                user: TenantUser::new("bob"),
            },
        ]
    );
    let users: Vec<_> = test.entity().users().map(|u| u.user_id.as_str()).collect();
    assert_eq!(users, vec!["bob", "tester"]);
}

#[test]
fn replacement_keeps_an_active_owner() {
    let mut test = tenant();
    test.execute(TenantCommand::ReplaceTenant {
        users: vec![TenantUser::new("tester"), TenantUser::new("alice")],
    })
    .expect_failure(FailureKind::Validation);
}

#[test]
fn only_the_platform_disables_a_tenant() {
    let mut test = tenant();
    test.execute(TenantCommand::DisableTenant)
        .expect_failure(FailureKind::Authorization);
    assert!(!test.entity().is_disabled());
}

#[test]
fn a_disabled_tenant_refuses_user_changes() {
    let mut test = tenant();
    let step = test.execute_as(platform(), TenantCommand::DisableTenant);
    assert_eq!(step.expect_success()["disabled"], true);
    assert_eq!(step.domain_events(), vec![&TenantEvent::TenantDisabled]);

    let failure = test
        .execute(set(TenantUser::new("bob")))
        .expect_failure(FailureKind::Validation)
        .clone();
    assert!(failure.message.contains("disabled"), "{failure}");
    test.execute(remove("alice")).expect_failure(FailureKind::Validation);
    assert!(test.entity().user("alice").is_some());
}

#[test]
fn enabling_restores_user_management() {
    let mut test = tenant();
    test.execute_as(platform(), TenantCommand::DisableTenant).expect_success();
    test.execute_as(platform(), TenantCommand::EnableTenant).expect_success();

    test.execute(set(TenantUser::new("bob"))).expect_success();
    assert!(test.entity().user("bob").is_some());
}

#[test]
fn switching_to_the_current_state_is_silent() {
    let mut test = tenant();
    let step = test.execute_as(platform(), TenantCommand::EnableTenant);
    step.expect_success();
    assert!(step.domain_events().is_empty());

    test.execute_as(platform(), TenantCommand::DisableTenant).expect_success();
    let step = test.execute_as(platform(), TenantCommand::DisableTenant);
    step.expect_success();
    assert!(step.domain_events().is_empty());
}

#[test]
fn the_tenant_replays_from_its_history() {
    let mut test = tenant();
    test.execute(set(TenantUser::owner("alice"))).expect_success();
    test.execute(remove("tester")).expect_success();
    test.execute_as(platform(), TenantCommand::DisableTenant).expect_success();

    let (outcome, replayed) = test.replay();
    assert_eq!(outcome, RecoveryOutcome::Ready);
    assert!(replayed.entity.is_disabled());
    assert_eq!(
        serde_json::to_value(&replayed.entity).unwrap(),
        serde_json::to_value(test.entity()).unwrap()
    );
}
