//! The case entity.
//!
//! A case is an arena of plan items, a case file and the sentry network that
//! connects them. `apply` folds events into that structure without running any
//! behaviour; `execute` hands the command to the transition engine, which adds
//! the events and runs their behaviour in two phases.

use crate::case_file::CaseFile;
use crate::command::{CaseCommand, ParentLink};
use crate::definition::{CaseDefinition, ItemKind, PlanItemDefinition};
use crate::engine::Engine;
use crate::event::CaseEvent;
use crate::item::{CriterionIdx, ItemIdx, ItemType, PlanItem};
use crate::sentry::{CriterionKind, Notification, SentryNetwork};
use crate::settings::CaseSettings;
use crate::state::{State, Transition};
use casework_core::codec::ManifestSpec;
use casework_core::entity::EntityId;
use casework_core::error::{ApplyError, CommandError};
use casework_core::event::EventMetadata;
use casework_core::message::UserIdentity;
use casework_runtime::metrics::PropagationMetrics;
use casework_runtime::{ModelEntity, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A running case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Case {
    pub(crate) id: String,
    pub(crate) definition: Option<Arc<CaseDefinition>>,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) items: Vec<PlanItem>,
    pub(crate) ids: BTreeMap<String, ItemIdx>,
    pub(crate) network: SentryNetwork,
    pub(crate) case_file: CaseFile,
    #[serde(skip)]
    pub(crate) notifications: Vec<Notification>,
}

impl Case {
    /// The definition, once started.
    #[must_use]
    pub fn definition(&self) -> Option<&CaseDefinition> {
        self.definition.as_deref()
    }

    /// Parent case of a sub-case.
    #[must_use]
    pub const fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Every plan item, in creation order; the case plan comes first.
    #[must_use]
    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    /// The case plan.
    #[must_use]
    pub fn case_plan(&self) -> Option<&PlanItem> {
        self.items.first()
    }

    /// Find an item by id, or else the most recent item with that name.
    #[must_use]
    pub fn find(&self, id_or_name: &str) -> Option<ItemIdx> {
        self.ids.get(id_or_name).copied().or_else(|| {
            self.items
                .iter()
                .rposition(|item| item.name == id_or_name)
        })
    }

    /// An item by id or name (see [`Case::find`]).
    #[must_use]
    pub fn item(&self, id_or_name: &str) -> Option<&PlanItem> {
        self.find(id_or_name).map(|idx| &self.items[idx])
    }

    /// All instances with the given name, by repetition index.
    #[must_use]
    pub fn instances(&self, name: &str) -> Vec<&PlanItem> {
        let mut instances: Vec<_> = self.items.iter().filter(|item| item.name == name).collect();
        instances.sort_by_key(|item| item.index);
        instances
    }

    /// State of the most recent item with that id or name.
    #[must_use]
    pub fn state_of(&self, id_or_name: &str) -> Option<State> {
        self.item(id_or_name).map(|item| item.state)
    }

    /// The case file.
    #[must_use]
    pub const fn case_file(&self) -> &CaseFile {
        &self.case_file
    }

    /// The sentry network.
    #[must_use]
    pub const fn network(&self) -> &SentryNetwork {
        &self.network
    }

    /// Criterion visits of the last command, in order.
    #[must_use]
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub(crate) fn definition_of(&self, idx: ItemIdx) -> Option<&PlanItemDefinition> {
        let definition = self.definition.as_deref()?;
        definition.find(&self.items.get(idx)?.definition_id)
    }

    /// Whether a criterion still reacts to its on-parts.
    pub(crate) fn is_listening(&self, c: CriterionIdx) -> bool {
        let Some(criterion) = self.network.criterion(c) else {
            return false;
        };
        let owner = &self.items[criterion.owner];
        // Children of a completed or terminated stage are released.
        if owner.stage.is_some_and(|stage| self.items[stage].state.is_final()) {
            return false;
        }
        match criterion.kind {
            CriterionKind::Entry => {
                !self.has_next_sibling(criterion.owner)
                    && (matches!(owner.state, State::Null | State::Available) || owner.repeats)
            }
            CriterionKind::Exit => !owner.state.is_final(),
            CriterionKind::Reactivate => owner.state == State::Failed,
        }
    }

    /// Whether a criterion holds: every on-part active and the guard true.
    pub(crate) fn criterion_satisfied(&self, c: CriterionIdx) -> bool {
        self.network.criterion(c).is_some_and(|criterion| {
            criterion.is_satisfied(self.case_file.data(), self.items[criterion.owner].index)
        })
    }

    fn has_next_sibling(&self, idx: ItemIdx) -> bool {
        let item = &self.items[idx];
        item.stage.is_some_and(|stage| {
            self.items[stage].children.iter().any(|&sibling| {
                let sibling = &self.items[sibling];
                sibling.definition_id == item.definition_id && sibling.index == item.index + 1
            })
        })
    }

    /// Whether a stage may complete.
    ///
    /// No child may be active. Auto-completing stages (and manual completion)
    /// need their required children semi-terminal; other stages need every
    /// child semi-terminal and no discretionary items left to plan.
    pub(crate) fn completion_allowed(&self, stage: ItemIdx, manual: bool) -> bool {
        let Some(definition) = self.definition_of(stage) else {
            return false;
        };
        let auto_complete = matches!(definition.kind, ItemKind::Stage { auto_complete: true, .. });
        for &child in &self.items[stage].children {
            let child = &self.items[child];
            if child.state.is_active() {
                return false;
            }
            if !child.state.is_semi_terminal() && (!(auto_complete || manual) || child.required) {
                return false;
            }
        }
        auto_complete || manual || !definition.has_discretionary_children()
    }

    fn index_of(&self, what: &'static str, id: &str) -> Result<ItemIdx, ApplyError> {
        self.ids.get(id).copied().ok_or_else(|| ApplyError::UnknownReference {
            what,
            id: id.to_string(),
        })
    }

    fn item_mut(&mut self, id: &str) -> Result<&mut PlanItem, ApplyError> {
        let idx = self.index_of("plan item", id)?;
        Ok(&mut self.items[idx])
    }

    fn resolve(&self, id_or_name: &str) -> Result<ItemIdx, CommandError> {
        self.find(id_or_name)
            .ok_or_else(|| CommandError::invalid(format!("Unknown plan item '{id_or_name}'")))
    }

    fn check_transition(&self, idx: ItemIdx, transition: Transition, user: &UserIdentity) -> Result<(), CommandError> {
        let item = &self.items[idx];
        if item.machine().target(item.state, transition, item.history_state).is_none() {
            return Err(CommandError::invalid(format!(
                "Transition {transition} is not allowed on '{}' in state {}",
                item.name, item.state
            )));
        }
        if let Some(stage) = item.stage {
            if !self.items[stage].state.is_active() {
                return Err(CommandError::invalid(format!(
                    "Cannot perform action '{transition}' on '{}' since the surrounding stage is not active",
                    item.name
                )));
            }
        }

        match (self.definition_of(idx).map(|d| &d.kind), transition) {
            (Some(ItemKind::HumanTask { performer: Some(role) }), Transition::Complete) if !user.has_role(role) => {
                Err(CommandError::unauthorized(format!(
                    "Only users with role '{role}' can complete '{}'",
                    item.name
                )))
            }
            (Some(ItemKind::UserEvent { authorized_roles }), Transition::Occur)
                if !authorized_roles.is_empty() && !authorized_roles.iter().any(|r| user.has_role(r)) =>
            {
                Err(CommandError::unauthorized(format!(
                    "User '{}' may not raise event '{}'",
                    user.id, item.name
                )))
            }
            _ if transition == Transition::Complete
                && item.item_type.is_stage()
                && !self.completion_allowed(idx, true) =>
            {
                Err(CommandError::invalid(
                    "Cannot complete the stage as there are active items remaining",
                ))
            }
            _ => Ok(()),
        }
    }

    fn check_start(definition: &CaseDefinition, case_file: &serde_json::Value) -> Result<(), CommandError> {
        definition
            .validate()
            .map_err(|e| CommandError::invalid(e.to_string()))?;
        match case_file {
            serde_json::Value::Null => Ok(()),
            serde_json::Value::Object(entries) => entries
                .keys()
                .find(|key| !definition.declares_file_item(key))
                .map_or(Ok(()), |key| {
                    Err(CommandError::invalid(format!("Unknown case file item '{key}'")))
                }),
            _ => Err(CommandError::invalid("The initial case file must be an object")),
        }
    }

    fn check_file_item(
        definition: &CaseDefinition,
        case_file: &CaseFile,
        path: &str,
        must_exist: bool,
    ) -> Result<(), CommandError> {
        if !definition.declares_file_item(path) {
            return Err(CommandError::invalid(format!("Unknown case file item '{path}'")));
        }
        match (must_exist, case_file.is_available(path)) {
            (true, false) => Err(CommandError::invalid(format!("Case file item '{path}' does not exist"))),
            (false, true) => Err(CommandError::invalid(format!("Case file item '{path}' already exists"))),
            _ => Ok(()),
        }
    }
}

impl ModelEntity for Case {
    const ENTITY_TYPE: &'static str = "Case";
    const COMMAND_MANIFESTS: &'static [ManifestSpec] = CaseCommand::MANIFESTS;
    const EVENT_MANIFESTS: &'static [ManifestSpec] = CaseEvent::MANIFESTS;

    type Command = CaseCommand;
    type Event = CaseEvent;
    type Settings = CaseSettings;

    fn create(id: &EntityId) -> Self {
        Self {
            id: id.as_str().to_string(),
            definition: None,
            parent: None,
            items: Vec::new(),
            ids: BTreeMap::new(),
            network: SentryNetwork::default(),
            case_file: CaseFile::default(),
            notifications: Vec::new(),
        }
    }

    fn supports(&self, command: &CaseCommand) -> bool {
        match command {
            CaseCommand::AddDiscretionaryItem { .. } => self
                .definition
                .as_ref()
                .is_none_or(|d| d.items().iter().any(|item| item.discretionary)),
            _ => true,
        }
    }

    fn validate(&self, command: &CaseCommand, tx: &Transaction<Self>) -> Result<(), CommandError> {
        if let CaseCommand::StartCase {
            definition, case_file, ..
        } = command
        {
            if self.definition.is_some() {
                return Err(CommandError::invalid(format!("Case '{}' already exists", self.id)));
            }
            return Self::check_start(definition, case_file);
        }

        let Some(definition) = self.definition.as_deref() else {
            return Err(CommandError::invalid("The case has not been started"));
        };
        match command {
            CaseCommand::StartCase { .. } => Ok(()),
            CaseCommand::MakePlanItemTransition { item, transition } => {
                self.check_transition(self.resolve(item)?, *transition, tx.user())
            }
            CaseCommand::MakeCaseTransition { transition } => {
                if self.items.is_empty() {
                    return Err(CommandError::Internal("Case plan is missing".into()));
                }
                self.check_transition(0, *transition, tx.user())
            }
            CaseCommand::AddDiscretionaryItem { stage, definition_id } => {
                let idx = self.resolve(stage)?;
                if !self.items[idx].item_type.is_stage() || !self.items[idx].state.is_active() {
                    return Err(CommandError::invalid(format!(
                        "'{stage}' is not an active stage"
                    )));
                }
                let planned = self
                    .definition_of(idx)
                    .map(PlanItemDefinition::children)
                    .unwrap_or_default()
                    .iter()
                    .any(|child| child.discretionary && &child.id == definition_id);
                if planned {
                    Ok(())
                } else {
                    Err(CommandError::invalid(format!(
                        "'{definition_id}' is not a discretionary item of '{stage}'"
                    )))
                }
            }
            CaseCommand::CreateCaseFileItem { path, .. } => {
                Self::check_file_item(definition, &self.case_file, path, false)
            }
            CaseCommand::UpdateCaseFileItem { path, .. }
            | CaseCommand::ReplaceCaseFileItem { path, .. }
            | CaseCommand::DeleteCaseFileItem { path } => {
                Self::check_file_item(definition, &self.case_file, path, true)
            }
        }
    }

    fn execute(
        &mut self,
        command: CaseCommand,
        tx: &mut Transaction<Self>,
    ) -> Result<serde_json::Value, CommandError> {
        self.notifications.clear();
        let mut engine = Engine::new(self, tx);
        let reply = engine.execute(command);
        PropagationMetrics::record_steps(Self::ENTITY_TYPE, engine.steps());
        reply
    }

    fn apply(&mut self, event: &CaseEvent, _metadata: &EventMetadata) -> Result<(), ApplyError> {
        match event {
            CaseEvent::CaseDefinitionApplied { definition, parent } => {
                self.definition = Some(Arc::clone(definition));
                self.parent.clone_from(parent);
            }
            CaseEvent::PlanItemCreated {
                item_id,
                definition_id,
                stage_id,
                index,
            } => {
                let definition = self
                    .definition
                    .clone()
                    .ok_or_else(|| ApplyError::Inconsistent("plan item created before the definition".into()))?;
                let item_definition = definition.find(definition_id).ok_or_else(|| ApplyError::UnknownReference {
                    what: "plan item definition",
                    id: definition_id.clone(),
                })?;
                if self.ids.contains_key(item_id) {
                    return Err(ApplyError::Inconsistent(format!("plan item '{item_id}' created twice")));
                }
                let stage = stage_id
                    .as_deref()
                    .map(|id| self.index_of("stage", id))
                    .transpose()?;
                let item_type = match stage {
                    None => ItemType::CasePlan,
                    Some(_) => ItemType::of(&item_definition.kind),
                };

                let idx = self.items.len();
                self.items
                    .push(PlanItem::new(item_id.clone(), item_definition, item_type, *index, stage));
                self.ids.insert(item_id.clone(), idx);
                if let Some(stage) = stage {
                    self.items[stage].children.push(idx);
                }
                self.network
                    .item_created(&mut self.items, idx, item_definition, &self.case_file);
            }
            CaseEvent::PlanItemTransitioned {
                item_id,
                transition,
                from,
                to,
                exit_criterion,
            } => {
                let idx = self.index_of("plan item", item_id)?;
                let item = &mut self.items[idx];
                if item.state != *from {
                    return Err(ApplyError::Inconsistent(format!(
                        "'{}' is {} but the transition starts from {from}",
                        item.name, item.state
                    )));
                }
                item.transitioned(*transition, *to, exit_criterion.as_deref());
                self.network
                    .item_transitioned(idx, *transition, exit_criterion.as_deref());
            }
            CaseEvent::RepetitionRuleEvaluated { item_id, repeats } => {
                self.item_mut(item_id)?.repeats = *repeats;
            }
            CaseEvent::RequiredRuleEvaluated { item_id, required } => {
                self.item_mut(item_id)?.required = *required;
            }
            CaseEvent::HumanTaskActivated { item_id, .. } => {
                self.item_mut(item_id)?.activations += 1;
            }
            CaseEvent::TimerSet { item_id, target } => {
                self.item_mut(item_id)?.timer_due = Some(*target);
            }
            CaseEvent::CaseFileItemTransitioned {
                path,
                transition,
                value,
            } => {
                self.case_file.transition(path, *transition, value);
                self.network.file_transitioned(path, *transition);
            }
        }
        Ok(())
    }

    fn recovery_completed(&mut self, tx: &mut Transaction<Self>) {
        let now = tx.timestamp();
        for item in &self.items {
            if item.item_type != ItemType::TimerEvent || item.state != State::Available {
                continue;
            }
            let Some(due) = item.timer_due else {
                continue;
            };
            let after = (due - now).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(case_id = %self.id, item = %item.name, ?after, "Re-arming timer event");
            tx.schedule_timer(
                item.id.clone(),
                after,
                CaseCommand::MakePlanItemTransition {
                    item: item.id.clone(),
                    transition: Transition::Occur,
                },
            );
        }
    }
}
