//! Shared setup for the case tests.

#![allow(dead_code, clippy::panic)]

use casework_cmmn::{Case, CaseCommand, CaseDefinition, CaseSettings, State, Transition};
use casework_testing::{EntityTest, init_tracing};
use serde_json::Value;
use std::sync::Arc;

pub const CASE_ID: &str = "case-1";

/// A started case with default settings.
pub fn start(definition: CaseDefinition) -> EntityTest<Case> {
    start_with(definition, CaseSettings::default(), Value::Null)
}

/// A started case with the given settings and initial case file.
pub fn start_with(definition: CaseDefinition, settings: CaseSettings, case_file: Value) -> EntityTest<Case> {
    init_tracing();
    EntityTest::<Case>::new(CASE_ID)
        .with_settings(settings)
        .given(start_case(definition, case_file))
}

pub fn start_case(definition: CaseDefinition, case_file: Value) -> CaseCommand {
    CaseCommand::StartCase {
        definition: Arc::new(definition),
        case_file,
        parent: None,
    }
}

pub fn transition(item: &str, transition: Transition) -> CaseCommand {
    CaseCommand::MakePlanItemTransition {
        item: item.to_string(),
        transition,
    }
}

/// State of the most recent item with that name.
pub fn state(test: &EntityTest<Case>, name: &str) -> State {
    test.entity()
        .state_of(name)
        .unwrap_or_else(|| panic!("no plan item named '{name}'"))
}

/// The case plan state.
pub fn plan_state(test: &EntityTest<Case>) -> State {
    test.entity()
        .case_plan()
        .map_or(State::Null, |plan| plan.state)
}

/// Whether replaying the history rebuilds exactly the live case.
pub fn replays_identically(test: &EntityTest<Case>) -> bool {
    let (_, replayed) = test.replay();
    serde_json::to_value(&replayed.entity).ok() == serde_json::to_value(test.entity()).ok()
}
