//! Recovery rebuilds exactly the case that produced the events.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use casework_cmmn::{
    CaseCommand, CaseDefinition, CaseFileTransition, CriterionDefinition, Expression, PlanItemDefinition, State,
    Transition,
};
use casework_runtime::RecoveryOutcome;
use common::{replays_identically, start, start_with, state, transition};
use proptest::prelude::*;
use serde_json::json;

fn workflow() -> CaseDefinition {
    CaseDefinition::new(
        "workflow",
        vec![
            PlanItemDefinition::human_task("Draft", None),
            PlanItemDefinition::stage(
                "Approval",
                vec![
                    PlanItemDefinition::human_task("Review", None)
                        .with_exit(CriterionDefinition::new("Withdrawn").on_item("Withdraw", Transition::Occur)),
                    PlanItemDefinition::milestone("Reviewed")
                        .with_entry(CriterionDefinition::new("Done").on_item("Review", Transition::Complete)),
                ],
            )
            .with_entry(CriterionDefinition::new("Drafted").on_item("Draft", Transition::Complete)),
            PlanItemDefinition::user_event("Withdraw", &[]),
            PlanItemDefinition::human_task("Annotate", None)
                .repeating(Expression::IndexBelow(3))
                .with_entry(CriterionDefinition::new("Noted").on_file("notes", CaseFileTransition::Update))
                .with_reactivate(CriterionDefinition::new("Again").on_item("Draft", Transition::Reactivate)),
        ],
    )
    .with_case_file(["notes"])
}

fn command(choice: u8, n: u8) -> CaseCommand {
    match choice % 12 {
        0 => transition("Draft", Transition::Complete),
        1 => transition("Review", Transition::Complete),
        2 => transition("Withdraw", Transition::Occur),
        3 => transition("Approval", Transition::Suspend),
        4 => transition("Approval", Transition::Resume),
        5 => transition("Draft", Transition::Fault),
        6 => transition("Draft", Transition::Reactivate),
        7 => transition("Annotate", Transition::Complete),
        8 => transition("Annotate", Transition::Fault),
        9 => CaseCommand::UpdateCaseFileItem {
            path: "notes".into(),
            value: json!({ "n": n }),
        },
        10 => CaseCommand::MakeCaseTransition {
            transition: Transition::Suspend,
        },
        _ => CaseCommand::MakeCaseTransition {
            transition: Transition::Reactivate,
        },
    }
}

#[test]
fn a_finished_case_replays_identically() {
    let mut test = start_with(workflow(), Default::default(), json!({ "notes": {} }));

    for step in [
        transition("Draft", Transition::Complete),
        CaseCommand::UpdateCaseFileItem {
            path: "notes".into(),
            value: json!({ "n": 1 }),
        },
        transition("Review", Transition::Complete),
        transition("Withdraw", Transition::Occur),
    ] {
        test.execute(step).expect_success();
    }
    assert_eq!(state(&test, "Reviewed"), State::Completed);
    assert!(replays_identically(&test));

    let (outcome, replayed) = test.replay();
    assert_eq!(outcome, RecoveryOutcome::Ready);
    assert_eq!(replayed.meta.sequence_nr, test.state().meta.sequence_nr);
}

#[test]
fn related_exit_criteria_survive_replay() {
    let mut test = start(workflow());
    test.execute(transition("Draft", Transition::Complete)).expect_success();
    test.execute(transition("Withdraw", Transition::Occur)).expect_success();
    assert_eq!(state(&test, "Review"), State::Terminated);

    let (_, replayed) = test.replay();
    let review = replayed.entity.item("Review").unwrap();
    assert_eq!(review.last_exit_criterion.as_deref(), Some("Withdrawn"));
    assert!(replays_identically(&test));
}

#[test]
fn an_uninitialized_case_replays_to_nothing() {
    let test = casework_testing::EntityTest::<casework_cmmn::Case>::new("empty");
    let (outcome, replayed) = test.replay();
    assert_eq!(outcome, RecoveryOutcome::Uninitialized);
    assert!(replayed.entity.case_plan().is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_command_sequence_replays_identically(steps in prop::collection::vec((any::<u8>(), any::<u8>()), 0..16)) {
        let mut test = start_with(workflow(), Default::default(), json!({ "notes": {} }));
        for (choice, n) in steps {
            let _ = test.execute(command(choice, n));
        }

        let (outcome, _) = test.replay();
        prop_assert_eq!(outcome, RecoveryOutcome::Ready);
        prop_assert!(replays_identically(&test));
    }
}
