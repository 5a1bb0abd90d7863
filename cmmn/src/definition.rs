//! Case definitions in their parsed, programmatic form.
//!
//! Parsing definition documents is not part of the engine; definitions are
//! built in code (or deserialized) and checked with [`CaseDefinition::validate`].
//!
//! # Example
//!
//! ```
//! use casework_cmmn::definition::{CaseDefinition, CriterionDefinition, PlanItemDefinition};
//! use casework_cmmn::state::Transition;
//!
//! let definition = CaseDefinition::new(
//!     "review",
//!     vec![
//!         PlanItemDefinition::human_task("Draft", None),
//!         PlanItemDefinition::human_task("Review", Some("reviewer")).with_entry(
//!             CriterionDefinition::new("AfterDraft").on_item("Draft", Transition::Complete),
//!         ),
//!     ],
//! )
//! .with_roles(["reviewer"]);
//!
//! assert!(definition.validate().is_ok());
//! ```

use crate::case_file::CaseFileTransition;
use crate::expression::Expression;
use crate::state::{StateMachine, Transition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors of the definition boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// No definition with that name.
    #[error("Definition '{0}' not found")]
    MissingDefinition(String),

    /// The definition does not validate.
    #[error("Definition '{name}' is invalid: {}", errors.join("; "))]
    InvalidDefinition {
        /// Definition name.
        name: String,
        /// Human readable problems.
        errors: Vec<String>,
    },
}

/// A complete case definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Definition name.
    pub name: String,
    /// The outermost stage.
    pub case_plan: PlanItemDefinition,
    /// Declared case file items (top level names).
    pub case_file: Vec<String>,
    /// Declared case roles.
    pub roles: Vec<String>,
}

/// Definition of one plan item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanItemDefinition {
    /// Identifier, unique within the definition.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the item is.
    pub kind: ItemKind,
    /// Repetition, required and manual activation rules.
    pub control: ItemControl,
    /// Criteria that start the item.
    pub entry_criteria: Vec<CriterionDefinition>,
    /// Criteria that end the item.
    pub exit_criteria: Vec<CriterionDefinition>,
    /// Criteria that reactivate a failed item.
    pub reactivate_criteria: Vec<CriterionDefinition>,
    /// Only planned on request.
    pub discretionary: bool,
}

/// The kinds of plan items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    /// A container of plan items.
    Stage {
        /// Child definitions.
        children: Vec<PlanItemDefinition>,
        /// Complete once the required children are done.
        auto_complete: bool,
    },
    /// Work done by a person.
    HumanTask {
        /// Role allowed to complete the task.
        performer: Option<String>,
    },
    /// Work done by a sub-case.
    CaseTask {
        /// Name of the sub-case definition.
        definition: String,
        /// Whether the task waits for the sub-case to finish.
        blocking: bool,
    },
    /// A point of progress.
    Milestone,
    /// Something a user reports.
    UserEvent {
        /// Roles allowed to raise the event; anyone when empty.
        authorized_roles: Vec<String>,
    },
    /// Something that happens after a delay.
    TimerEvent {
        /// Delay after creation.
        after_millis: u64,
    },
}

impl ItemKind {
    /// State machine the kind follows, outside the case plan.
    #[must_use]
    pub const fn machine(&self) -> StateMachine {
        match self {
            Self::Stage { .. } | Self::HumanTask { .. } | Self::CaseTask { .. } => StateMachine::TaskStage,
            Self::Milestone | Self::UserEvent { .. } | Self::TimerEvent { .. } => StateMachine::EventMilestone,
        }
    }

    /// Whether the kind is an event listener (user or timer event).
    #[must_use]
    pub const fn is_event_listener(&self) -> bool {
        matches!(self, Self::UserEvent { .. } | Self::TimerEvent { .. })
    }

    /// Short name used in messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Stage { .. } => "Stage",
            Self::HumanTask { .. } => "HumanTask",
            Self::CaseTask { .. } => "CaseTask",
            Self::Milestone => "Milestone",
            Self::UserEvent { .. } => "UserEvent",
            Self::TimerEvent { .. } => "TimerEvent",
        }
    }
}

/// Plan item control rules. Absent rules take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemControl {
    /// Whether another instance follows (default: no).
    pub repetition: Option<Expression>,
    /// Whether the stage waits for the item (default: no).
    pub required: Option<Expression>,
    /// Whether the item is enabled instead of started (default: no).
    pub manual_activation: Option<Expression>,
}

/// An entry, exit or reactivate criterion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriterionDefinition {
    /// Identifier, unique within the item.
    pub id: String,
    /// Guard over the case file.
    pub if_part: Option<Expression>,
    /// Subscriptions that must all be active.
    pub on_parts: Vec<OnPartDefinition>,
}

/// A subscription to a plan item or case file item transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OnPartDefinition {
    /// Transition of plan items with definition id `source`.
    PlanItem {
        /// Definition id of the source items.
        source: String,
        /// Awaited transition.
        transition: Transition,
        /// Only when the source exited through this exit criterion.
        exit_criterion: Option<String>,
    },
    /// Transition of a case file item.
    CaseFile {
        /// Case file item path.
        source: String,
        /// Awaited transition.
        transition: CaseFileTransition,
    },
}

impl OnPartDefinition {
    /// Source identifier, for messages.
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::PlanItem { source, .. } | Self::CaseFile { source, .. } => source,
        }
    }
}

impl CriterionDefinition {
    /// A criterion without on-parts or guard.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            if_part: None,
            on_parts: Vec::new(),
        }
    }

    /// Subscribe to a plan item transition.
    #[must_use]
    pub fn on_item(mut self, source: impl Into<String>, transition: Transition) -> Self {
        self.on_parts.push(OnPartDefinition::PlanItem {
            source: source.into(),
            transition,
            exit_criterion: None,
        });
        self
    }

    /// Subscribe to the exit of a plan item through one of its exit criteria.
    #[must_use]
    pub fn on_item_exit(mut self, source: impl Into<String>, exit_criterion: impl Into<String>) -> Self {
        self.on_parts.push(OnPartDefinition::PlanItem {
            source: source.into(),
            transition: Transition::Exit,
            exit_criterion: Some(exit_criterion.into()),
        });
        self
    }

    /// Subscribe to a case file item transition.
    #[must_use]
    pub fn on_file(mut self, source: impl Into<String>, transition: CaseFileTransition) -> Self {
        self.on_parts.push(OnPartDefinition::CaseFile {
            source: source.into(),
            transition,
        });
        self
    }

    /// Guard the criterion.
    #[must_use]
    pub fn when(mut self, if_part: Expression) -> Self {
        self.if_part = Some(if_part);
        self
    }
}

impl PlanItemDefinition {
    /// An item of `kind` named after its id.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ItemKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            control: ItemControl::default(),
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            reactivate_criteria: Vec::new(),
            discretionary: false,
        }
    }

    /// An auto-completing stage.
    #[must_use]
    pub fn stage(id: impl Into<String>, children: Vec<Self>) -> Self {
        Self::new(
            id,
            ItemKind::Stage {
                children,
                auto_complete: true,
            },
        )
    }

    /// A human task, optionally restricted to a performer role.
    #[must_use]
    pub fn human_task(id: impl Into<String>, performer: Option<&str>) -> Self {
        Self::new(
            id,
            ItemKind::HumanTask {
                performer: performer.map(str::to_string),
            },
        )
    }

    /// A task running a sub-case.
    #[must_use]
    pub fn case_task(id: impl Into<String>, definition: impl Into<String>, blocking: bool) -> Self {
        Self::new(
            id,
            ItemKind::CaseTask {
                definition: definition.into(),
                blocking,
            },
        )
    }

    /// A milestone.
    #[must_use]
    pub fn milestone(id: impl Into<String>) -> Self {
        Self::new(id, ItemKind::Milestone)
    }

    /// A user event.
    #[must_use]
    pub fn user_event(id: impl Into<String>, authorized_roles: &[&str]) -> Self {
        Self::new(
            id,
            ItemKind::UserEvent {
                authorized_roles: authorized_roles.iter().map(|r| (*r).to_string()).collect(),
            },
        )
    }

    /// A timer event.
    #[must_use]
    pub fn timer_event(id: impl Into<String>, after_millis: u64) -> Self {
        Self::new(id, ItemKind::TimerEvent { after_millis })
    }

    /// Replace the display name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an entry criterion.
    #[must_use]
    pub fn with_entry(mut self, criterion: CriterionDefinition) -> Self {
        self.entry_criteria.push(criterion);
        self
    }

    /// Add an exit criterion.
    #[must_use]
    pub fn with_exit(mut self, criterion: CriterionDefinition) -> Self {
        self.exit_criteria.push(criterion);
        self
    }

    /// Add a reactivate criterion.
    #[must_use]
    pub fn with_reactivate(mut self, criterion: CriterionDefinition) -> Self {
        self.reactivate_criteria.push(criterion);
        self
    }

    /// Set the repetition rule.
    #[must_use]
    pub fn repeating(mut self, rule: Expression) -> Self {
        self.control.repetition = Some(rule);
        self
    }

    /// Set the required rule.
    #[must_use]
    pub fn required(mut self, rule: Expression) -> Self {
        self.control.required = Some(rule);
        self
    }

    /// Set the manual activation rule.
    #[must_use]
    pub fn manual(mut self, rule: Expression) -> Self {
        self.control.manual_activation = Some(rule);
        self
    }

    /// Mark the item discretionary.
    #[must_use]
    pub const fn discretionary(mut self) -> Self {
        self.discretionary = true;
        self
    }

    /// Turn off auto-completion of a stage. No effect on other kinds.
    #[must_use]
    pub fn manual_completion(mut self) -> Self {
        if let ItemKind::Stage { auto_complete, .. } = &mut self.kind {
            *auto_complete = false;
        }
        self
    }

    /// Child definitions of a stage; empty for other kinds.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match &self.kind {
            ItemKind::Stage { children, .. } => children,
            _ => &[],
        }
    }

    /// Whether the item is a stage that has discretionary children.
    #[must_use]
    pub fn has_discretionary_children(&self) -> bool {
        self.children().iter().any(|child| child.discretionary)
    }

    /// Find a definition by id in this subtree.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Self> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    fn visit<'a>(&'a self, all: &mut Vec<&'a Self>) {
        all.push(self);
        for child in self.children() {
            child.visit(all);
        }
    }
}

impl CaseDefinition {
    /// A definition whose case plan is an auto-completing stage with `children`.
    #[must_use]
    pub fn new(name: impl Into<String>, children: Vec<PlanItemDefinition>) -> Self {
        let name = name.into();
        Self {
            case_plan: PlanItemDefinition::stage(name.clone(), children),
            name,
            case_file: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// Replace the case plan.
    #[must_use]
    pub fn with_case_plan(mut self, case_plan: PlanItemDefinition) -> Self {
        self.case_plan = case_plan;
        self
    }

    /// Declare case file items.
    #[must_use]
    pub fn with_case_file<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.case_file.extend(items.into_iter().map(Into::into));
        self
    }

    /// Declare case roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Find a plan item definition by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&PlanItemDefinition> {
        self.case_plan.find(id)
    }

    /// Every plan item definition, case plan first, depth first.
    #[must_use]
    pub fn items(&self) -> Vec<&PlanItemDefinition> {
        let mut all = Vec::new();
        self.case_plan.visit(&mut all);
        all
    }

    /// Whether `path` lies in a declared case file item.
    #[must_use]
    pub fn declares_file_item(&self, path: &str) -> bool {
        let root = path.split('.').next().unwrap_or_default();
        self.case_file.iter().any(|item| item == root)
    }

    /// Check the definition, reporting every problem found.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` with the list of problems.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let errors = self.problems();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::InvalidDefinition {
                name: self.name.clone(),
                errors,
            })
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !matches!(self.case_plan.kind, ItemKind::Stage { .. }) {
            errors.push(format!("Case plan '{}' must be a stage", self.case_plan.id));
        }

        let items = self.items();
        let mut seen = BTreeSet::new();
        for item in &items {
            if !seen.insert(item.id.as_str()) {
                errors.push(format!("Plan item id '{}' is used more than once", item.id));
            }
        }

        for item in &items {
            self.check_item(item, &mut errors);
        }
        errors
    }

    fn check_item(&self, item: &PlanItemDefinition, errors: &mut Vec<String>) {
        let label = item.kind.label();
        if item.kind.is_event_listener() && !(item.entry_criteria.is_empty() && item.exit_criteria.is_empty()) {
            errors.push(format!("{label} '{}' cannot have entry or exit criteria", item.id));
        }
        if matches!(item.kind, ItemKind::Milestone) && !item.exit_criteria.is_empty() {
            errors.push(format!("Milestone '{}' cannot have exit criteria", item.id));
        }
        match &item.kind {
            ItemKind::HumanTask {
                performer: Some(role),
            } if !self.roles.contains(role) => {
                errors.push(format!("HumanTask '{}' has undeclared performer role '{role}'", item.id));
            }
            ItemKind::UserEvent { authorized_roles } => {
                for role in authorized_roles.iter().filter(|r| !self.roles.contains(r)) {
                    errors.push(format!("UserEvent '{}' has undeclared role '{role}'", item.id));
                }
            }
            _ => {}
        }

        let mut criterion_ids = BTreeSet::new();
        let criteria = item
            .entry_criteria
            .iter()
            .chain(&item.exit_criteria)
            .chain(&item.reactivate_criteria);
        for criterion in criteria {
            if !criterion_ids.insert(criterion.id.as_str()) {
                errors.push(format!(
                    "Criterion id '{}' is used more than once in '{}'",
                    criterion.id, item.id
                ));
            }
            for on_part in &criterion.on_parts {
                self.check_on_part(item, criterion, on_part, errors);
            }
        }
    }

    fn check_on_part(
        &self,
        item: &PlanItemDefinition,
        criterion: &CriterionDefinition,
        on_part: &OnPartDefinition,
        errors: &mut Vec<String>,
    ) {
        match on_part {
            OnPartDefinition::PlanItem {
                source, exit_criterion, ..
            } => match self.find(source) {
                None => errors.push(format!(
                    "Criterion '{}' of '{}' refers to unknown plan item '{source}'",
                    criterion.id, item.id
                )),
                Some(source_item) => {
                    if let Some(exit) = exit_criterion {
                        if !source_item.exit_criteria.iter().any(|c| &c.id == exit) {
                            errors.push(format!(
                                "Criterion '{}' of '{}' refers to unknown exit criterion '{exit}' of '{source}'",
                                criterion.id, item.id
                            ));
                        }
                    }
                }
            },
            OnPartDefinition::CaseFile { source, .. } => {
                if !self.declares_file_item(source) {
                    errors.push(format!(
                        "Criterion '{}' of '{}' refers to unknown case file item '{source}'",
                        criterion.id, item.id
                    ));
                }
            }
        }
    }
}
