//! Entry, exit and reactivate criteria and the order in which they fire.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use casework_cmmn::{
    Case, CaseCommand, CaseDefinition, CaseEvent, CaseFileTransition, CaseSettings, CriterionDefinition,
    CriterionKind, Expression, PlanItemDefinition, State, Transition,
};
use casework_core::response::FailureKind;
use casework_testing::Step;
use common::{plan_state, start, start_with, state, transition};
use serde_json::json;

fn review() -> CaseDefinition {
    CaseDefinition::new(
        "review",
        vec![
            PlanItemDefinition::human_task("Draft", None),
            PlanItemDefinition::human_task("Review", None)
                .with_entry(CriterionDefinition::new("AfterDraft").on_item("Draft", Transition::Complete)),
            PlanItemDefinition::milestone("Reviewed")
                .with_entry(CriterionDefinition::new("AfterReview").on_item("Review", Transition::Complete)),
        ],
    )
}

#[test]
fn entry_criteria_start_waiting_items() {
    let mut test = start(review());
    assert_eq!(state(&test, "Review"), State::Available);
    assert_eq!(state(&test, "Reviewed"), State::Available);

    test.execute(transition("Draft", Transition::Complete)).expect_success();
    assert_eq!(state(&test, "Review"), State::Active);

    let fired: Vec<_> = test
        .entity()
        .notifications()
        .iter()
        .filter(|n| n.fired)
        .map(|n| n.criterion.as_str())
        .collect();
    assert_eq!(fired, vec!["AfterDraft"]);

    test.execute(transition("Review", Transition::Complete)).expect_success();
    assert_eq!(state(&test, "Reviewed"), State::Completed);
    assert_eq!(plan_state(&test), State::Completed);
}

#[test]
fn criteria_already_satisfied_at_creation_fire() {
    // The stage is created after Draft completed; its entry criterion is
    // informed of Draft's latest transition when connected.
    let definition = CaseDefinition::new(
        "late",
        vec![
            PlanItemDefinition::human_task("Draft", None),
            PlanItemDefinition::stage(
                "Later",
                vec![PlanItemDefinition::human_task("Publish", None)
                    .with_entry(CriterionDefinition::new("Drafted").on_item("Draft", Transition::Complete))],
            )
            .with_entry(CriterionDefinition::new("Go").on_item("Draft", Transition::Complete)),
        ],
    );
    let mut test = start(definition);
    assert_eq!(state(&test, "Later"), State::Available);

    test.execute(transition("Draft", Transition::Complete)).expect_success();
    assert_eq!(state(&test, "Later"), State::Active);
    assert_eq!(state(&test, "Publish"), State::Active);
}

fn nested_exit() -> CaseDefinition {
    CaseDefinition::new(
        "nested",
        vec![PlanItemDefinition::stage(
            "Outer",
            vec![
                PlanItemDefinition::human_task("Trigger", None),
                PlanItemDefinition::stage(
                    "Inner",
                    vec![PlanItemDefinition::human_task("Work", None)
                        .with_exit(CriterionDefinition::new("WorkExit").on_item("Trigger", Transition::Complete))],
                ),
            ],
        )
        .with_exit(CriterionDefinition::new("OuterExit").on_item("Trigger", Transition::Complete))],
    )
}

#[test]
fn nested_criteria_hear_a_transition_first() {
    let mut test = start(nested_exit());

    test.execute(transition("Trigger", Transition::Complete)).expect_success();

    let exits: Vec<_> = test
        .entity()
        .notifications()
        .iter()
        .filter(|n| n.kind == CriterionKind::Exit)
        .map(|n| (n.criterion.as_str(), n.fired))
        .collect();
    assert_eq!(exits, vec![("WorkExit", true), ("OuterExit", true)]);

    assert_eq!(state(&test, "Work"), State::Terminated);
    assert_eq!(test.entity().item("Work").unwrap().last_exit_criterion.as_deref(), Some("WorkExit"));
    assert_eq!(state(&test, "Outer"), State::Terminated);
    assert_eq!(state(&test, "Inner"), State::Terminated);
    assert_eq!(plan_state(&test), State::Completed);
}

#[test]
fn listeners_are_ordered_deepest_first() {
    let test = start(nested_exit());
    let case = test.entity();
    let trigger = case.find("Trigger").unwrap();

    let order: Vec<_> = case
        .network()
        .item_listeners(trigger)
        .unwrap()
        .of(CriterionKind::Exit)
        .iter()
        .map(|listener| case.network().criterion(listener.criterion).unwrap().id.as_str())
        .collect();
    assert_eq!(order, vec!["WorkExit", "OuterExit"]);
}

#[test]
fn exit_cycles_settle() {
    let pair = CaseDefinition::new(
        "pair",
        vec![
            PlanItemDefinition::human_task("Left", None)
                .with_exit(CriterionDefinition::new("RightGone").on_item("Right", Transition::Exit)),
            PlanItemDefinition::human_task("Right", None)
                .with_exit(CriterionDefinition::new("LeftGone").on_item("Left", Transition::Exit)),
        ],
    );
    let mut test = start(pair);
    test.execute(transition("Left", Transition::Exit)).expect_success();
    assert_eq!(state(&test, "Left"), State::Terminated);
    assert_eq!(state(&test, "Right"), State::Terminated);
    assert_eq!(plan_state(&test), State::Completed);

    let ring = CaseDefinition::new(
        "ring",
        vec![
            PlanItemDefinition::human_task("A", None)
                .with_exit(CriterionDefinition::new("CGone").on_item("C", Transition::Exit)),
            PlanItemDefinition::human_task("B", None)
                .with_exit(CriterionDefinition::new("AGone").on_item("A", Transition::Exit)),
            PlanItemDefinition::human_task("C", None)
                .with_exit(CriterionDefinition::new("BGone").on_item("B", Transition::Exit)),
        ],
    );
    let mut test = start(ring);
    test.execute(transition("B", Transition::Exit)).expect_success();
    for name in ["A", "B", "C"] {
        assert_eq!(state(&test, name), State::Terminated, "{name}");
    }
    let fired = test.entity().notifications().iter().filter(|n| n.fired).count();
    assert_eq!(fired, 2);
}

fn escalation() -> CaseDefinition {
    CaseDefinition::new(
        "escalation",
        vec![
            PlanItemDefinition::human_task("Handle", None)
                .with_exit(CriterionDefinition::new("Cancelled").on_item("Cancel", Transition::Occur))
                .with_exit(CriterionDefinition::new("Expired").on_item("Expire", Transition::Occur)),
            PlanItemDefinition::user_event("Cancel", &[]),
            PlanItemDefinition::user_event("Expire", &[]),
            PlanItemDefinition::human_task("Apologize", None)
                .with_entry(CriterionDefinition::new("AfterCancel").on_item_exit("Handle", "Cancelled")),
        ],
    )
}

#[test]
fn related_exit_criteria_must_match() {
    let mut test = start(escalation());
    test.execute(transition("Expire", Transition::Occur)).expect_success();
    assert_eq!(state(&test, "Handle"), State::Terminated);
    assert_eq!(state(&test, "Apologize"), State::Available);

    let mut test = start(escalation());
    test.execute(transition("Cancel", Transition::Occur)).expect_success();
    assert_eq!(state(&test, "Handle"), State::Terminated);
    assert_eq!(state(&test, "Apologize"), State::Active);
}

fn claims() -> CaseDefinition {
    CaseDefinition::new(
        "claims",
        vec![
            PlanItemDefinition::human_task("Assess", None).with_entry(
                CriterionDefinition::new("ClaimFiled").on_file("claim", CaseFileTransition::Create),
            ),
            PlanItemDefinition::human_task("Escalate", None).with_entry(
                CriterionDefinition::new("Large")
                    .on_file("claim", CaseFileTransition::Update)
                    .when(Expression::GreaterThan {
                        path: "claim.amount".into(),
                        value: 1000.0,
                    }),
            ),
        ],
    )
    .with_case_file(["claim"])
}

#[test]
fn case_file_transitions_trigger_criteria() {
    let mut test = start(claims());
    assert_eq!(state(&test, "Assess"), State::Available);

    test.execute(CaseCommand::CreateCaseFileItem {
        path: "claim".into(),
        value: json!({ "amount": 10 }),
    })
    .expect_success();
    assert_eq!(state(&test, "Assess"), State::Active);

    test.execute(CaseCommand::UpdateCaseFileItem {
        path: "claim".into(),
        value: json!({ "note": "small" }),
    })
    .expect_success();
    assert_eq!(state(&test, "Escalate"), State::Available);

    test.execute(CaseCommand::UpdateCaseFileItem {
        path: "claim".into(),
        value: json!({ "amount": 5000 }),
    })
    .expect_success();
    assert_eq!(state(&test, "Escalate"), State::Active);
    assert_eq!(test.entity().case_file().get("claim.note"), Some(&json!("small")));
}

#[test]
fn an_initial_case_file_counts_as_created() {
    let test = start_with(claims(), CaseSettings::default(), json!({ "claim": { "amount": 1 } }));
    assert_eq!(state(&test, "Assess"), State::Active);
}

#[test]
fn case_file_commands_are_validated() {
    let mut test = start(claims());

    test.execute(CaseCommand::UpdateCaseFileItem {
        path: "claim".into(),
        value: json!({ "amount": 1 }),
    })
    .expect_failure(FailureKind::Validation);
    test.execute(CaseCommand::CreateCaseFileItem {
        path: "policy".into(),
        value: json!({}),
    })
    .expect_failure(FailureKind::Validation);

    test.execute(CaseCommand::CreateCaseFileItem {
        path: "claim".into(),
        value: json!({ "amount": 1 }),
    })
    .expect_success();
    test.execute(CaseCommand::CreateCaseFileItem {
        path: "claim".into(),
        value: json!({ "amount": 2 }),
    })
    .expect_failure(FailureKind::Validation);

    let unchanged = test.execute(CaseCommand::UpdateCaseFileItem {
        path: "claim".into(),
        value: json!({ "amount": 1 }),
    });
    assert_eq!(unchanged.expect_success()["changed"], false);
    assert!(unchanged.domain_events().is_empty());

    test.execute(CaseCommand::DeleteCaseFileItem { path: "claim".into() })
        .expect_success();
    assert_eq!(test.entity().case_file().get("claim"), None);
    test.execute(CaseCommand::DeleteCaseFileItem { path: "claim".into() })
        .expect_failure(FailureKind::Validation);
}

#[test]
fn repeating_items_repeat_on_each_entry() {
    let definition = CaseDefinition::new(
        "requests",
        vec![PlanItemDefinition::human_task("Handle", None)
            .repeating(Expression::Constant(true))
            .with_entry(CriterionDefinition::new("Requested").on_file("request", CaseFileTransition::Update))],
    )
    .with_case_file(["request"]);
    let mut test = start_with(definition, CaseSettings::default(), json!({ "request": { "n": 0 } }));
    assert_eq!(state(&test, "Handle"), State::Available);

    for n in 1..=3 {
        test.execute(CaseCommand::UpdateCaseFileItem {
            path: "request".into(),
            value: json!({ "n": n }),
        })
        .expect_success();
    }

    let instances = test.entity().instances("Handle");
    assert_eq!(instances.len(), 3);
    assert!(instances.iter().all(|item| item.state == State::Active));
    assert_eq!(instances.iter().map(|item| item.index).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn reactivate_criteria_revive_failed_items() {
    let definition = CaseDefinition::new(
        "retry",
        vec![
            PlanItemDefinition::human_task("Deliver", None)
                .with_reactivate(CriterionDefinition::new("Retried").on_item("Retry", Transition::Occur)),
            PlanItemDefinition::user_event("Retry", &[]),
            PlanItemDefinition::human_task("Monitor", None),
        ],
    );
    let mut test = start(definition);

    test.execute(transition("Deliver", Transition::Fault)).expect_success();
    assert_eq!(state(&test, "Deliver"), State::Failed);

    test.execute(transition("Retry", Transition::Occur)).expect_success();
    assert_eq!(state(&test, "Deliver"), State::Active);
}

fn closing_stage() -> CaseDefinition {
    CaseDefinition::new(
        "closing",
        vec![
            PlanItemDefinition::user_event("Kill", &[]),
            PlanItemDefinition::user_event("Go", &[]),
            PlanItemDefinition::human_task("Other", None),
            PlanItemDefinition::stage(
                "Work",
                vec![
                    PlanItemDefinition::human_task("Main", None),
                    PlanItemDefinition::human_task("Optional", None)
                        .with_entry(CriterionDefinition::new("OptionalEntry").on_item("Go", Transition::Occur))
                        .with_exit(CriterionDefinition::new("OptionalExit").on_item("Kill", Transition::Occur)),
                ],
            ),
        ],
    )
}

fn transitions_of(step: &Step<Case>, item_id: &str) -> usize {
    step.domain_events()
        .into_iter()
        .filter(|event| matches!(event, CaseEvent::PlanItemTransitioned { item_id: id, .. } if id == item_id))
        .count()
}

#[test]
fn exit_criteria_are_released_when_their_stage_completes() {
    let mut test = start(closing_stage());
    test.execute(transition("Main", Transition::Complete)).expect_success();
    assert_eq!(state(&test, "Work"), State::Completed);
    assert_eq!(state(&test, "Optional"), State::Available);
    let optional = test.entity().item("Optional").unwrap().id.clone();

    let step = test.execute(transition("Kill", Transition::Occur));
    step.expect_success();
    assert_eq!(state(&test, "Optional"), State::Available);
    assert_eq!(transitions_of(&step, &optional), 0);
    assert!(test.entity().notifications().iter().all(|n| !n.fired));
}

#[test]
fn entry_criteria_are_released_when_their_stage_completes() {
    let mut test = start(closing_stage());
    test.execute(transition("Main", Transition::Complete)).expect_success();
    let optional = test.entity().item("Optional").unwrap().id.clone();

    let step = test.execute(transition("Go", Transition::Occur));
    step.expect_success();
    assert_eq!(state(&test, "Optional"), State::Available);
    assert_eq!(transitions_of(&step, &optional), 0);
}

#[test]
fn criteria_of_a_terminated_stage_stay_silent() {
    let mut test = start(closing_stage());
    test.execute(transition("Work", Transition::Terminate)).expect_success();
    assert_eq!(state(&test, "Optional"), State::Terminated);
    let optional = test.entity().item("Optional").unwrap().id.clone();

    for event in ["Go", "Kill"] {
        let step = test.execute(transition(event, Transition::Occur));
        step.expect_success();
        assert_eq!(transitions_of(&step, &optional), 0, "{event}");
    }
    assert_eq!(state(&test, "Optional"), State::Terminated);
    assert_eq!(state(&test, "Other"), State::Active);
}

/// Empty stages that start on each other's completion, seeded by `Seed`.
fn completion_ring(names: &[&str], repeating: bool) -> CaseDefinition {
    let mut items = vec![PlanItemDefinition::human_task("Seed", None)];
    for (i, name) in names.iter().enumerate() {
        let previous = names[(i + names.len() - 1) % names.len()];
        let mut stage = PlanItemDefinition::stage(*name, Vec::new())
            .with_entry(CriterionDefinition::new(format!("After{previous}")).on_item(previous, Transition::Complete));
        if i == 0 {
            stage = stage.with_entry(CriterionDefinition::new("Seeded").on_item("Seed", Transition::Complete));
        }
        if repeating {
            stage = stage.repeating(Expression::Constant(true));
        }
        items.push(stage);
    }
    CaseDefinition::new("ring", items)
}

#[test]
fn completion_cycles_settle_once_every_item_completed() {
    for names in [&["A", "B"][..], &["A", "B", "C"][..]] {
        let mut test = start(completion_ring(names, false));
        let step = test.execute(transition("Seed", Transition::Complete));
        step.expect_success();

        for name in names {
            assert_eq!(state(&test, name), State::Completed, "{name}");
            assert_eq!(test.entity().instances(name).len(), 1, "{name}");
        }
        assert_eq!(plan_state(&test), State::Completed);
        assert!(step.domain_events().len() < 20 * names.len(), "{names:?}");
    }
}

#[test]
fn repeating_completion_cycles_fail_without_appending() {
    for names in [&["A", "B"][..], &["A", "B", "C"][..]] {
        let mut test = start(completion_ring(names, true));
        let before = test.history().count();

        test.execute(transition("Seed", Transition::Complete))
            .expect_failure(FailureKind::Engine);
        assert_eq!(test.history().count(), before, "{names:?}");
        assert_eq!(state(&test, "Seed"), State::Active);
        assert_eq!(state(&test, "A"), State::Available);
    }
}

#[test]
fn exit_on_completion_cycles_settle() {
    let pair = CaseDefinition::new(
        "pair",
        vec![
            PlanItemDefinition::human_task("Left", None)
                .with_exit(CriterionDefinition::new("RightDone").on_item("Right", Transition::Complete)),
            PlanItemDefinition::human_task("Right", None)
                .with_exit(CriterionDefinition::new("LeftDone").on_item("Left", Transition::Complete)),
        ],
    );
    let mut test = start(pair);
    test.execute(transition("Left", Transition::Complete)).expect_success();
    assert_eq!(state(&test, "Left"), State::Completed);
    assert_eq!(state(&test, "Right"), State::Terminated);
    assert_eq!(plan_state(&test), State::Completed);
}
