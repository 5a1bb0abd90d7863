//! Events of the case entity.

use crate::case_file::CaseFileTransition;
use crate::command::ParentLink;
use crate::definition::CaseDefinition;
use crate::state::{State, Transition};
use casework_core::codec::ManifestSpec;
use casework_core::event::ModelEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Something that happened to a case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CaseEvent {
    /// The case got its definition.
    CaseDefinitionApplied {
        /// The definition.
        definition: Arc<CaseDefinition>,
        /// Parent case, for sub-cases.
        parent: Option<ParentLink>,
    },
    /// A plan item instance was added to the arena.
    PlanItemCreated {
        /// Instance id.
        item_id: String,
        /// Definition id.
        definition_id: String,
        /// Containing stage instance; `None` for the case plan.
        stage_id: Option<String>,
        /// Repetition index.
        index: u32,
    },
    /// A plan item changed state.
    PlanItemTransitioned {
        /// Instance id.
        item_id: String,
        /// The transition.
        transition: Transition,
        /// State before.
        from: State,
        /// State after.
        to: State,
        /// Exit criterion that caused the transition.
        exit_criterion: Option<String>,
    },
    /// The repetition rule of an item was evaluated.
    RepetitionRuleEvaluated {
        /// Instance id.
        item_id: String,
        /// Outcome.
        repeats: bool,
    },
    /// The required rule of an item was evaluated.
    RequiredRuleEvaluated {
        /// Instance id.
        item_id: String,
        /// Outcome.
        required: bool,
    },
    /// A human task became active and is ready for its performer.
    HumanTaskActivated {
        /// Instance id.
        item_id: String,
        /// Role that may complete it.
        performer: Option<String>,
    },
    /// A timer event was armed.
    TimerSet {
        /// Instance id.
        item_id: String,
        /// When it occurs.
        target: DateTime<Utc>,
    },
    /// A case file item changed.
    CaseFileItemTransitioned {
        /// Case file path.
        path: String,
        /// The transition.
        transition: CaseFileTransition,
        /// New content; null after a delete.
        value: Value,
    },
}

impl ModelEvent for CaseEvent {}

impl CaseEvent {
    /// Manifests of every case event.
    pub const MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("CaseDefinitionApplied"),
        ManifestSpec::new("PlanItemCreated"),
        ManifestSpec::versioned("PlanItemTransitioned", 1, &[add_exit_criterion]),
        ManifestSpec::new("RepetitionRuleEvaluated"),
        ManifestSpec::new("RequiredRuleEvaluated"),
        ManifestSpec::new("HumanTaskActivated"),
        ManifestSpec::new("TimerSet"),
        ManifestSpec::new("CaseFileItemTransitioned"),
    ];
}

/// Version 0 of `PlanItemTransitioned` did not record the exit criterion.
fn add_exit_criterion(mut payload: Value) -> Result<Value, String> {
    let fields = payload
        .as_object_mut()
        .ok_or_else(|| "PlanItemTransitioned payload is not an object".to_string())?;
    fields.entry("exit_criterion").or_insert(Value::Null);
    Ok(payload)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use casework_core::codec::{Decoded, MessageCodec};
    use casework_core::entity::EntityId;
    use casework_core::event::{EntityEvent, EventMetadata, StoredEvent};
    use serde_json::json;

    fn stored(manifest: &str, payload: &Value) -> StoredEvent {
        StoredEvent {
            manifest: manifest.into(),
            payload: serde_json::to_vec(payload).unwrap(),
            metadata: EventMetadata {
                entity_id: EntityId::new("case-1"),
                entity_type: "Case".into(),
                tenant: "acme".into(),
                user_id: "alice".into(),
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn old_transitions_gain_an_empty_exit_criterion() {
        let codec = MessageCodec::builder().events("Case", CaseEvent::MANIFESTS).build().unwrap();
        let old = stored(
            "PlanItemTransitioned",
            &json!({ "item_id": "t1", "transition": "Complete", "from": "Active", "to": "Completed" }),
        );

        match codec.decode_event::<CaseEvent>("Case", &old) {
            Decoded::Message(EntityEvent::Domain(CaseEvent::PlanItemTransitioned { exit_criterion, to, .. })) => {
                assert_eq!(exit_criterion, None);
                assert_eq!(to, State::Completed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transitions_are_written_at_version_one() {
        let codec = MessageCodec::builder().events("Case", CaseEvent::MANIFESTS).build().unwrap();
        let event = EntityEvent::Domain(CaseEvent::PlanItemTransitioned {
            item_id: "t1".into(),
            transition: Transition::Exit,
            from: State::Active,
            to: State::Terminated,
            exit_criterion: Some("Cancel".into()),
        });
        let metadata = stored("x", &Value::Null).metadata;
        let encoded = codec.encode_event("Case", &event, metadata).unwrap();
        assert_eq!(encoded.manifest, "PlanItemTransitioned;1");
    }
}
