//! Commands of the case entity.

use crate::definition::CaseDefinition;
use crate::state::Transition;
use casework_core::codec::ManifestSpec;
use casework_core::message::ModelCommand;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Link from a sub-case to the case task that started it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// Parent case id.
    pub case_id: String,
    /// Case task instance id in the parent.
    pub task_id: String,
    /// Whether the parent task waits for this case to finish.
    pub blocking: bool,
}

/// A request to a case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CaseCommand {
    /// Create the case.
    StartCase {
        /// The definition to run.
        definition: Arc<CaseDefinition>,
        /// Initial case file content, one entry per case file item.
        #[serde(default)]
        case_file: Value,
        /// Parent case, for sub-cases.
        #[serde(default)]
        parent: Option<ParentLink>,
    },
    /// Apply a transition to a plan item, found by id or by name.
    MakePlanItemTransition {
        /// Item id or name.
        item: String,
        /// The transition.
        transition: Transition,
    },
    /// Apply a transition to the case plan.
    MakeCaseTransition {
        /// The transition.
        transition: Transition,
    },
    /// Plan a discretionary item in a stage.
    AddDiscretionaryItem {
        /// Stage id or name.
        stage: String,
        /// Definition id of the discretionary item.
        definition_id: String,
    },
    /// Give a case file item its first value.
    CreateCaseFileItem {
        /// Case file path.
        path: String,
        /// Value.
        value: Value,
    },
    /// Merge content into a case file item.
    UpdateCaseFileItem {
        /// Case file path.
        path: String,
        /// Content to merge.
        value: Value,
    },
    /// Replace a case file item.
    ReplaceCaseFileItem {
        /// Case file path.
        path: String,
        /// New value.
        value: Value,
    },
    /// Remove a case file item.
    DeleteCaseFileItem {
        /// Case file path.
        path: String,
    },
}

impl CaseCommand {
    /// Manifests of every case command.
    pub const MANIFESTS: &'static [ManifestSpec] = &[
        ManifestSpec::new("StartCase"),
        ManifestSpec::new("MakePlanItemTransition"),
        ManifestSpec::new("MakeCaseTransition"),
        ManifestSpec::new("AddDiscretionaryItem"),
        ManifestSpec::new("CreateCaseFileItem"),
        ManifestSpec::new("UpdateCaseFileItem"),
        ManifestSpec::new("ReplaceCaseFileItem"),
        ManifestSpec::new("DeleteCaseFileItem"),
    ];
}

impl ModelCommand for CaseCommand {
    fn is_bootstrap(&self) -> bool {
        matches!(self, Self::StartCase { .. })
    }

    fn description(&self) -> String {
        match self {
            Self::StartCase { definition, .. } => format!("StartCase({})", definition.name),
            Self::MakePlanItemTransition { item, transition } => format!("{transition} on '{item}'"),
            Self::MakeCaseTransition { transition } => format!("{transition} on the case"),
            Self::AddDiscretionaryItem { definition_id, .. } => format!("AddDiscretionaryItem({definition_id})"),
            Self::CreateCaseFileItem { path, .. } => format!("CreateCaseFileItem({path})"),
            Self::UpdateCaseFileItem { path, .. } => format!("UpdateCaseFileItem({path})"),
            Self::ReplaceCaseFileItem { path, .. } => format!("ReplaceCaseFileItem({path})"),
            Self::DeleteCaseFileItem { path } => format!("DeleteCaseFileItem({path})"),
        }
    }
}
