//! The transition engine.
//!
//! Every event the engine adds is folded into the case first; then its
//! behaviour runs in two phases. The immediate phase performs the state
//! action of the item and informs entry and reactivate criteria. The delayed
//! phase checks stage completion and informs exit criteria.
//!
//! Immediate phases run depth first, as events are added. Delayed phases are
//! postponed: each behaviour collects the delayed work of the events added
//! during its own immediate phase, newest first. Once the outermost immediate
//! phase returns, the delayed tree runs top down, each node running its own
//! delayed phase before those of its children. Events added by a delayed phase
//! start a new immediate phase nested under that node.
//!
//! Depth and the total number of steps are bounded by [`CaseSettings`], so a
//! cyclic definition fails the command instead of looping.
//!
//! [`CaseSettings`]: crate::settings::CaseSettings

use crate::case::Case;
use crate::case_file::CaseFileTransition;
use crate::command::{CaseCommand, ParentLink};
use crate::definition::{CaseDefinition, ItemKind};
use crate::event::CaseEvent;
use crate::expression::rule_holds;
use crate::item::{ItemIdx, ItemType};
use crate::sentry::{CriterionKind, ListenerRef, Notification, OnPart};
use crate::settings::ReactivationPolicy;
use crate::state::{State, StateMachine, Transition};
use casework_core::entity::EntityId;
use casework_core::error::CommandError;
use casework_core::response::ModelResponse;
use casework_runtime::metrics::PropagationMetrics;
use casework_runtime::{ModelEntity, Transaction};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Behaviour attached to an added event.
#[derive(Clone, Debug)]
enum Behaviour {
    Item {
        item: ItemIdx,
        transition: Transition,
        to: State,
        exit_criterion: Option<String>,
    },
    File {
        path: String,
        transition: CaseFileTransition,
    },
}

impl fmt::Display for Behaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item { item, transition, to, .. } => write!(f, "{transition} of item #{item} into {to}"),
            Self::File { path, transition } => write!(f, "{transition:?} of case file item '{path}'"),
        }
    }
}

/// A delayed phase waiting to run, with the delayed phases it collected.
#[derive(Debug)]
struct Postponed {
    behaviour: Behaviour,
    depth: usize,
    children: Vec<Postponed>,
}

/// One level of the call stack.
#[derive(Debug, Default)]
struct Frame {
    depth: usize,
    children: Vec<Postponed>,
}

/// Runs one command against a case.
pub(crate) struct Engine<'a> {
    case: &'a mut Case,
    tx: &'a mut Transaction<Case>,
    frames: Vec<Frame>,
    steps: usize,
    max_depth: usize,
    max_steps: usize,
    reactivation: ReactivationPolicy,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(case: &'a mut Case, tx: &'a mut Transaction<Case>) -> Self {
        let settings = tx.settings();
        let (max_depth, max_steps, reactivation) = (
            settings.max_propagation_depth,
            settings.max_propagation_steps,
            settings.reactivation,
        );
        Self {
            case,
            tx,
            frames: Vec::new(),
            steps: 0,
            max_depth,
            max_steps,
            reactivation,
        }
    }

    /// Behaviours run so far.
    pub(crate) const fn steps(&self) -> usize {
        self.steps
    }

    pub(crate) fn execute(&mut self, command: CaseCommand) -> Result<Value, CommandError> {
        match command {
            CaseCommand::StartCase {
                definition,
                case_file,
                parent,
            } => {
                self.start_case(definition, case_file, parent)?;
                Ok(self.item_reply(0))
            }
            CaseCommand::MakePlanItemTransition { item, transition } => {
                let idx = self.resolve(&item)?;
                self.make_transition(idx, transition, None)?;
                Ok(self.item_reply(idx))
            }
            CaseCommand::MakeCaseTransition { transition } => {
                self.make_transition(0, transition, None)?;
                Ok(self.item_reply(0))
            }
            CaseCommand::AddDiscretionaryItem { stage, definition_id } => {
                let stage = self.resolve(&stage)?;
                let idx = self.plan_discretionary(stage, &definition_id)?;
                Ok(self.item_reply(idx))
            }
            CaseCommand::CreateCaseFileItem { path, value } => {
                self.file_transition(path, CaseFileTransition::Create, value)
            }
            CaseCommand::UpdateCaseFileItem { path, value } => {
                let merged = self.case.case_file.merged(&path, &value);
                if self.case.case_file.get(&path) == Some(&merged) {
                    tracing::debug!(case_id = %self.case.id, %path, "Update leaves the case file unchanged");
                    return Ok(json!({ "path": path, "changed": false }));
                }
                self.file_transition(path, CaseFileTransition::Update, merged)
            }
            CaseCommand::ReplaceCaseFileItem { path, value } => {
                self.file_transition(path, CaseFileTransition::Replace, value)
            }
            CaseCommand::DeleteCaseFileItem { path } => {
                self.file_transition(path, CaseFileTransition::Delete, Value::Null)
            }
        }
    }

    fn resolve(&self, id_or_name: &str) -> Result<ItemIdx, CommandError> {
        self.case
            .find(id_or_name)
            .ok_or_else(|| CommandError::invalid(format!("Unknown plan item '{id_or_name}'")))
    }

    fn item_reply(&self, idx: ItemIdx) -> Value {
        self.case.items.get(idx).map_or(Value::Null, |item| {
            json!({ "planItemId": item.id, "name": item.name, "state": item.state })
        })
    }

    fn definition(&self) -> Result<Arc<CaseDefinition>, CommandError> {
        self.case
            .definition
            .clone()
            .ok_or_else(|| CommandError::Internal("case has no definition".into()))
    }

    // ---- adding events ----

    fn emit(&mut self, event: CaseEvent) -> Result<(), CommandError> {
        let behaviour = match &event {
            CaseEvent::PlanItemTransitioned {
                item_id,
                transition,
                to,
                exit_criterion,
                ..
            } => Some(Behaviour::Item {
                item: self.case.ids.get(item_id).copied().ok_or_else(|| {
                    CommandError::Internal(format!("transition of unknown plan item '{item_id}'"))
                })?,
                transition: *transition,
                to: *to,
                exit_criterion: exit_criterion.clone(),
            }),
            CaseEvent::CaseFileItemTransitioned { path, transition, .. } => Some(Behaviour::File {
                path: path.clone(),
                transition: *transition,
            }),
            _ => None,
        };
        self.tx.add_event(self.case, event)?;
        match behaviour {
            Some(behaviour) => self.push(behaviour),
            None => Ok(()),
        }
    }

    fn push(&mut self, behaviour: Behaviour) -> Result<(), CommandError> {
        let depth = self.frames.last().map_or(1, |frame| frame.depth + 1);
        self.steps += 1;
        if depth > self.max_depth {
            return Err(CommandError::Internal(format!(
                "Transition propagation exceeded depth {} at {behaviour}",
                self.max_depth
            )));
        }
        if self.steps > self.max_steps {
            return Err(CommandError::Internal(format!(
                "Transition propagation exceeded {} steps at {behaviour}",
                self.max_steps
            )));
        }
        tracing::trace!(case_id = %self.case.id, depth, %behaviour, "Immediate phase");

        self.frames.push(Frame {
            depth,
            children: Vec::new(),
        });
        let outcome = self.immediate(&behaviour);
        let frame = self.frames.pop().unwrap_or_default();
        outcome?;

        let postponed = Postponed {
            behaviour,
            depth,
            children: frame.children,
        };
        match self.frames.last_mut() {
            Some(parent) => {
                parent.children.insert(0, postponed);
                Ok(())
            }
            None => self.run_delayed(postponed),
        }
    }

    fn run_delayed(&mut self, postponed: Postponed) -> Result<(), CommandError> {
        let Postponed {
            behaviour,
            depth,
            children,
        } = postponed;
        tracing::trace!(case_id = %self.case.id, depth, %behaviour, "Delayed phase");

        self.frames.push(Frame { depth, children });
        let outcome = self.delayed(&behaviour);
        let frame = self.frames.pop().unwrap_or_default();
        outcome?;

        for child in frame.children {
            self.run_delayed(child)?;
        }
        Ok(())
    }

    fn immediate(&mut self, behaviour: &Behaviour) -> Result<(), CommandError> {
        match behaviour {
            Behaviour::Item {
                item,
                transition,
                to,
                exit_criterion,
            } => {
                self.state_action(*item, *transition, *to)?;
                let listeners = self.item_listeners(*item, CriterionKind::Entry);
                let source = self.case.items[*item].id.clone();
                self.inform(&listeners, &source, &transition.to_string(), |on_part| {
                    on_part.matches_item(*transition, exit_criterion.as_deref())
                })
            }
            Behaviour::File { path, transition } => {
                let listeners = self.file_listeners(path, CriterionKind::Entry);
                self.inform(&listeners, path, &format!("{transition:?}"), |on_part| {
                    on_part.matches_file(*transition)
                })
            }
        }
    }

    fn delayed(&mut self, behaviour: &Behaviour) -> Result<(), CommandError> {
        match behaviour {
            Behaviour::Item {
                item,
                transition,
                to,
                exit_criterion,
            } => {
                if to.is_semi_terminal() {
                    if let Some(stage) = self.case.items[*item].stage {
                        self.try_completion(stage)?;
                    }
                }
                let listeners = self.item_listeners(*item, CriterionKind::Exit);
                let source = self.case.items[*item].id.clone();
                self.inform(&listeners, &source, &transition.to_string(), |on_part| {
                    on_part.matches_item(*transition, exit_criterion.as_deref())
                })
            }
            Behaviour::File { path, transition } => {
                let listeners = self.file_listeners(path, CriterionKind::Exit);
                self.inform(&listeners, path, &format!("{transition:?}"), |on_part| {
                    on_part.matches_file(*transition)
                })
            }
        }
    }

    // ---- sentries ----

    fn item_listeners(&self, item: ItemIdx, kind: CriterionKind) -> Vec<ListenerRef> {
        self.case
            .network
            .item_listeners(item)
            .map(|listeners| listeners.of(kind).to_vec())
            .unwrap_or_default()
    }

    fn file_listeners(&self, path: &str, kind: CriterionKind) -> Vec<ListenerRef> {
        self.case
            .network
            .file_listeners(path)
            .map(|listeners| listeners.of(kind).to_vec())
            .unwrap_or_default()
    }

    /// Visit listeners in order and fire those that are satisfied.
    ///
    /// The informing on-part counts as active when it matches this very
    /// transition; later events may already have overwritten its flag.
    fn inform<M>(&mut self, listeners: &[ListenerRef], source: &str, label: &str, matches: M) -> Result<(), CommandError>
    where
        M: Fn(&OnPart) -> bool,
    {
        for listener in listeners {
            let Some(criterion) = self.case.network.criterion(listener.criterion) else {
                continue;
            };
            let owner = &self.case.items[criterion.owner];
            let data = self.case.case_file.data();
            let satisfied = criterion.on_parts.iter().enumerate().all(|(p, on_part)| {
                if p == listener.on_part {
                    matches(on_part)
                } else {
                    on_part.active
                }
            }) && criterion
                .if_part
                .as_ref()
                .is_none_or(|guard| guard.evaluate(data, owner.index));
            let fired = satisfied && self.case.is_listening(listener.criterion);

            self.case.notifications.push(Notification {
                criterion: criterion.id.clone(),
                owner: owner.id.clone(),
                kind: criterion.kind,
                source: source.to_string(),
                transition: label.to_string(),
                fired,
            });
            if fired {
                tracing::debug!(
                    case_id = %self.case.id,
                    criterion = %criterion.id,
                    owner = %owner.name,
                    kind = %criterion.kind,
                    %source,
                    "Criterion satisfied"
                );
                self.satisfy(listener.criterion)?;
            }
        }
        Ok(())
    }

    fn satisfy(&mut self, c: usize) -> Result<(), CommandError> {
        let Some(criterion) = self.case.network.criterion(c) else {
            return Ok(());
        };
        let (kind, owner, id) = (criterion.kind, criterion.owner, criterion.id.clone());
        match kind {
            // Null items pick up their satisfied entry criteria when created.
            CriterionKind::Entry if self.case.items[owner].state.is_null() => Ok(()),
            CriterionKind::Entry => self.entry_satisfied(owner),
            CriterionKind::Exit => {
                let transition = self.case.items[owner].machine().exit_transition();
                self.make_transition(owner, transition, Some(id)).map(|_| ())
            }
            CriterionKind::Reactivate => self.make_transition(owner, Transition::Reactivate, None).map(|_| ()),
        }
    }

    fn entry_satisfied(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let item = &self.case.items[idx];
        if item.index == 0 && item.state == State::Available {
            if let Some(transition) = self.entry_transition(idx) {
                self.make_transition(idx, transition, None)?;
            }
            Ok(())
        } else {
            self.repeat(idx)
        }
    }

    // ---- transitions ----

    /// Add the transition event if the transition is allowed.
    fn make_transition(
        &mut self,
        idx: ItemIdx,
        transition: Transition,
        exit_criterion: Option<String>,
    ) -> Result<bool, CommandError> {
        let item = &self.case.items[idx];
        let Some(to) = item.machine().target(item.state, transition, item.history_state) else {
            tracing::trace!(item = %item.name, state = %item.state, %transition, "Transition ignored");
            return Ok(false);
        };
        self.emit(CaseEvent::PlanItemTransitioned {
            item_id: item.id.clone(),
            transition,
            from: item.state,
            to,
            exit_criterion,
        })?;
        Ok(true)
    }

    fn entry_transition(&self, idx: ItemIdx) -> Option<Transition> {
        let item = &self.case.items[idx];
        match item.item_type {
            ItemType::Milestone => Some(Transition::Occur),
            ItemType::UserEvent | ItemType::TimerEvent | ItemType::CasePlan => None,
            ItemType::Stage | ItemType::HumanTask | ItemType::CaseTask => {
                let manual = self.case.definition_of(idx).and_then(|d| d.control.manual_activation.as_ref());
                if rule_holds(manual, false, self.case.case_file.data(), item.index) {
                    Some(Transition::Enable)
                } else {
                    Some(Transition::Start)
                }
            }
        }
    }

    fn state_action(&mut self, idx: ItemIdx, transition: Transition, to: State) -> Result<(), CommandError> {
        let item_type = self.case.items[idx].item_type;
        match (item_type.machine(), to) {
            (StateMachine::EventMilestone, State::Available) => match transition {
                Transition::Create => self.create_instance(idx),
                _ => Ok(()),
            },
            (StateMachine::TaskStage, State::Available) => self.create_instance(idx),
            (StateMachine::TaskStage, State::Active) => match transition {
                Transition::Start | Transition::ManualStart => self.start_instance(idx),
                Transition::Reactivate => self.reactivate_instance(idx),
                _ => self.resume_instance(idx),
            },
            (StateMachine::CasePlan, State::Active) => match transition {
                Transition::Create => self.start_instance(idx),
                Transition::Reactivate if self.case.items[idx].history_state != State::Suspended => {
                    self.reactivate_instance(idx)
                }
                _ => self.resume_instance(idx),
            },
            (_, State::Suspended) => self.suspend_instance(idx),
            (_, State::Completed) => {
                self.complete_instance(idx)?;
                self.repeat_unless_sentried(idx)
            }
            (_, State::Terminated) => {
                self.terminate_instance(idx)?;
                self.repeat_unless_sentried(idx)
            }
            (_, State::Failed) => self.notify_parent(idx, Transition::Fault),
            _ => Ok(()),
        }
    }

    /// Tasks and stages without entry criteria repeat as soon as they end.
    fn repeat_unless_sentried(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let item = &self.case.items[idx];
        if item.machine() == StateMachine::TaskStage && item.entry_criteria.is_empty() {
            self.repeat(idx)
        } else {
            Ok(())
        }
    }

    fn create_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let definition = self.definition()?;
        let item = &self.case.items[idx];
        let item_definition = definition
            .find(&item.definition_id)
            .ok_or_else(|| CommandError::Internal(format!("no definition for '{}'", item.name)))?;
        let (item_id, index) = (item.id.clone(), item.index);

        let data = self.case.case_file.data();
        let repeats = rule_holds(item_definition.control.repetition.as_ref(), false, data, index);
        let required = rule_holds(item_definition.control.required.as_ref(), false, data, index);
        self.emit(CaseEvent::RepetitionRuleEvaluated {
            item_id: item_id.clone(),
            repeats,
        })?;
        self.emit(CaseEvent::RequiredRuleEvaluated {
            item_id: item_id.clone(),
            required,
        })?;

        if let ItemKind::TimerEvent { after_millis } = item_definition.kind {
            let after = Duration::from_millis(after_millis);
            let delay = chrono::Duration::from_std(after).map_err(|e| CommandError::Internal(e.to_string()))?;
            let target = self.tx.timestamp() + delay;
            self.emit(CaseEvent::TimerSet {
                item_id: item_id.clone(),
                target,
            })?;
            self.tx.schedule_timer(
                item_id.clone(),
                after,
                CaseCommand::MakePlanItemTransition {
                    item: item_id,
                    transition: Transition::Occur,
                },
            );
        }
        self.begin_life_cycle(idx)
    }

    fn begin_life_cycle(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let criteria = self.case.items[idx].entry_criteria.clone();
        if criteria.is_empty() {
            if let Some(transition) = self.entry_transition(idx) {
                self.make_transition(idx, transition, None)?;
            }
            return Ok(());
        }
        if criteria.iter().any(|c| self.case.criterion_satisfied(*c)) {
            self.entry_satisfied(idx)?;
        }
        Ok(())
    }

    fn start_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        match self.case.items[idx].item_type {
            ItemType::CasePlan | ItemType::Stage => self.instantiate_children(idx),
            ItemType::HumanTask => self.activate_human_task(idx),
            ItemType::CaseTask => self.start_sub_case(idx),
            ItemType::Milestone | ItemType::UserEvent | ItemType::TimerEvent => Ok(()),
        }
    }

    fn reactivate_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let item_type = self.case.items[idx].item_type;
        match (self.reactivation, item_type) {
            (ReactivationPolicy::Full, ItemType::CasePlan | ItemType::Stage) => self.instantiate_children(idx),
            (ReactivationPolicy::Full, ItemType::HumanTask) => self.activate_human_task(idx),
            (ReactivationPolicy::Full, ItemType::CaseTask) => {
                self.ask_sub_case(idx, Transition::Reactivate, true)
            }
            (ReactivationPolicy::ResumeOnly, ItemType::CasePlan | ItemType::Stage) => self.create_null_children(idx),
            _ => Ok(()),
        }
    }

    fn resume_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        if !self.case.items[idx].item_type.is_stage() {
            return Ok(());
        }
        for child in self.case.items[idx].children.clone() {
            self.make_transition(child, Transition::ParentResume, None)?;
        }
        self.create_null_children(idx)
    }

    fn suspend_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        if !self.case.items[idx].item_type.is_stage() {
            return Ok(());
        }
        for child in self.case.items[idx].children.clone() {
            self.make_transition(child, Transition::ParentSuspend, None)?;
        }
        Ok(())
    }

    fn complete_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        match self.case.items[idx].item_type {
            ItemType::TimerEvent => {
                self.tx.cancel_timer(self.case.items[idx].id.clone());
                Ok(())
            }
            ItemType::CasePlan => self.notify_parent(idx, Transition::Complete),
            _ => Ok(()),
        }
    }

    fn terminate_instance(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        match self.case.items[idx].item_type {
            ItemType::CasePlan => {
                self.terminate_children(idx)?;
                self.notify_parent(idx, Transition::Terminate)
            }
            ItemType::Stage => self.terminate_children(idx),
            ItemType::TimerEvent => {
                self.tx.cancel_timer(self.case.items[idx].id.clone());
                Ok(())
            }
            ItemType::CaseTask => self.ask_sub_case(idx, Transition::Terminate, false),
            ItemType::HumanTask | ItemType::Milestone | ItemType::UserEvent => Ok(()),
        }
    }

    fn terminate_children(&mut self, stage: ItemIdx) -> Result<(), CommandError> {
        for child in self.case.items[stage].children.clone() {
            let transition = self.case.items[child].machine().termination_transition();
            self.make_transition(child, transition, None)?;
        }
        Ok(())
    }

    // ---- stages ----

    /// Create every non-discretionary child that has no instance yet, then
    /// start the life cycle of all Null children.
    fn instantiate_children(&mut self, stage: ItemIdx) -> Result<(), CommandError> {
        let definition = self.definition()?;
        let stage_definition = definition
            .find(&self.case.items[stage].definition_id)
            .ok_or_else(|| CommandError::Internal("no definition for stage".into()))?;

        for child in stage_definition.children() {
            let instantiated = self.case.items[stage]
                .children
                .iter()
                .any(|&c| self.case.items[c].definition_id == child.id);
            if !child.discretionary && !instantiated {
                self.create_child(stage, &child.id, 0)?;
            }
        }
        self.create_null_children(stage)?;
        if self.case.items[stage].children.is_empty() {
            self.try_completion(stage)?;
        }
        Ok(())
    }

    fn create_null_children(&mut self, stage: ItemIdx) -> Result<(), CommandError> {
        for child in self.case.items[stage].children.clone() {
            if self.case.items[child].state.is_null() {
                self.make_transition(child, Transition::Create, None)?;
            }
        }
        Ok(())
    }

    fn create_child(&mut self, stage: ItemIdx, definition_id: &str, index: u32) -> Result<ItemIdx, CommandError> {
        let item_id = Uuid::new_v4().to_string();
        self.emit(CaseEvent::PlanItemCreated {
            item_id: item_id.clone(),
            definition_id: definition_id.to_string(),
            stage_id: Some(self.case.items[stage].id.clone()),
            index,
        })?;
        self.case
            .ids
            .get(&item_id)
            .copied()
            .ok_or_else(|| CommandError::Internal(format!("plan item '{item_id}' was not created")))
    }

    fn plan_discretionary(&mut self, stage: ItemIdx, definition_id: &str) -> Result<ItemIdx, CommandError> {
        let index = self.instances_in(stage, definition_id);
        let idx = self.create_child(stage, definition_id, index)?;
        if self.case.items[stage].state.is_active() {
            self.make_transition(idx, Transition::Create, None)?;
        }
        Ok(idx)
    }

    fn instances_in(&self, stage: ItemIdx, definition_id: &str) -> u32 {
        let count = self.case.items[stage]
            .children
            .iter()
            .filter(|&&c| self.case.items[c].definition_id == definition_id)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn try_completion(&mut self, stage: ItemIdx) -> Result<(), CommandError> {
        if self.case.items[stage].state.is_active() && self.case.completion_allowed(stage, false) {
            tracing::debug!(case_id = %self.case.id, stage = %self.case.items[stage].name, "Stage completes");
            self.make_transition(stage, Transition::Complete, None)?;
        }
        Ok(())
    }

    /// Create the next instance of a repeating item.
    fn repeat(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let Some(stage) = self.case.items[idx].stage else {
            return Ok(());
        };
        if !self.case.items[stage].state.is_active() {
            return Ok(());
        }
        let definition = self.definition()?;
        let item = &self.case.items[idx];
        let Some(item_definition) = definition.find(&item.definition_id) else {
            return Ok(());
        };
        let (item_id, index, repeated) = (item.id.clone(), item.index, item.repeats);

        let repeats = rule_holds(
            item_definition.control.repetition.as_ref(),
            false,
            self.case.case_file.data(),
            index,
        );
        if repeats != repeated {
            self.emit(CaseEvent::RepetitionRuleEvaluated { item_id, repeats })?;
        }
        if !repeats || item_definition.discretionary {
            return Ok(());
        }

        let definition_id = item_definition.id.clone();
        let index = self.instances_in(stage, &definition_id);
        tracing::debug!(case_id = %self.case.id, item = %item_definition.name, index, "Repeating plan item");
        let next = self.create_child(stage, &definition_id, index)?;
        self.make_transition(next, Transition::Create, None)?;
        if self.case.items[next].state == State::Available {
            if let Some(transition) = self.entry_transition(next) {
                self.make_transition(next, transition, None)?;
            }
        }
        Ok(())
    }

    // ---- tasks ----

    fn activate_human_task(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let performer = match self.case.definition_of(idx).map(|d| &d.kind) {
            Some(ItemKind::HumanTask { performer }) => performer.clone(),
            _ => None,
        };
        self.emit(CaseEvent::HumanTaskActivated {
            item_id: self.case.items[idx].id.clone(),
            performer,
        })
    }

    fn start_sub_case(&mut self, idx: ItemIdx) -> Result<(), CommandError> {
        let Some(ItemKind::CaseTask { definition, blocking }) = self.case.definition_of(idx).map(|d| d.kind.clone())
        else {
            return Ok(());
        };
        let item_id = self.case.items[idx].id.clone();

        let definitions = Arc::clone(&self.tx.settings().definitions);
        let sub_definition = match definitions.read(&definition) {
            Ok(sub_definition) => sub_definition,
            Err(e) => {
                tracing::warn!(case_id = %self.case.id, task = %item_id, error = %e, "Cannot start sub-case");
                self.tx.debug(format!("Case task '{item_id}' failed: {e}"));
                return self.make_transition(idx, Transition::Fault, None).map(|_| ());
            }
        };

        let case_file = match self.case.case_file.data() {
            Value::Object(entries) => entries
                .iter()
                .filter(|(key, _)| sub_definition.declares_file_item(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => serde_json::Map::new(),
        };
        let command = CaseCommand::StartCase {
            definition: sub_definition,
            case_file: Value::Object(case_file),
            parent: Some(ParentLink {
                case_id: self.case.id.clone(),
                task_id: item_id.clone(),
                blocking,
            }),
        };

        let on_success = item_id.clone();
        let on_failure = item_id.clone();
        self.tx.ask(
            Case::ENTITY_TYPE,
            EntityId::new(item_id),
            &command,
            move |case: &mut Case, _: &ModelResponse, tx: &mut Transaction<Case>| {
                if blocking {
                    return Ok(());
                }
                respond(case, tx, &on_success, Transition::Complete)
            },
            move |case: &mut Case, response: &ModelResponse, tx: &mut Transaction<Case>| {
                tx.debug(format!("Sub-case of '{on_failure}' failed: {response:?}"));
                respond(case, tx, &on_failure, Transition::Fault)
            },
        )?;
        Ok(())
    }

    /// Send a case plan transition to the sub-case of a case task.
    fn ask_sub_case(&mut self, idx: ItemIdx, transition: Transition, fault_on_failure: bool) -> Result<(), CommandError> {
        let item_id = self.case.items[idx].id.clone();
        let on_failure = item_id.clone();
        self.tx.ask(
            Case::ENTITY_TYPE,
            EntityId::new(item_id),
            &CaseCommand::MakeCaseTransition { transition },
            |_: &mut Case, _: &ModelResponse, _: &mut Transaction<Case>| Ok(()),
            move |case: &mut Case, response: &ModelResponse, tx: &mut Transaction<Case>| {
                tx.debug(format!("{transition} of sub-case '{on_failure}' failed: {response:?}"));
                if fault_on_failure {
                    respond(case, tx, &on_failure, Transition::Fault)
                } else {
                    Ok(())
                }
            },
        )?;
        Ok(())
    }

    /// Tell a waiting parent case how this case ended.
    fn notify_parent(&mut self, idx: ItemIdx, transition: Transition) -> Result<(), CommandError> {
        if self.case.items[idx].item_type != ItemType::CasePlan {
            return Ok(());
        }
        let Some(parent) = self.case.parent.clone().filter(|parent| parent.blocking) else {
            return Ok(());
        };
        tracing::debug!(case_id = %self.case.id, parent = %parent.case_id, %transition, "Reporting to parent case");
        self.tx.ask(
            Case::ENTITY_TYPE,
            EntityId::new(parent.case_id),
            &CaseCommand::MakePlanItemTransition {
                item: parent.task_id,
                transition,
            },
            |_: &mut Case, _: &ModelResponse, _: &mut Transaction<Case>| Ok(()),
            |_: &mut Case, response: &ModelResponse, tx: &mut Transaction<Case>| {
                tx.debug(format!("Parent case refused the outcome: {response:?}"));
                Ok(())
            },
        )?;
        Ok(())
    }

    // ---- case file ----

    fn start_case(
        &mut self,
        definition: Arc<CaseDefinition>,
        case_file: Value,
        parent: Option<ParentLink>,
    ) -> Result<(), CommandError> {
        let plan_definition = definition.case_plan.id.clone();
        tracing::info!(case_id = %self.case.id, definition = %definition.name, "Starting case");
        self.emit(CaseEvent::CaseDefinitionApplied { definition, parent })?;
        if let Value::Object(entries) = case_file {
            for (path, value) in entries {
                self.emit(CaseEvent::CaseFileItemTransitioned {
                    path,
                    transition: CaseFileTransition::Create,
                    value,
                })?;
            }
        }
        self.emit(CaseEvent::PlanItemCreated {
            item_id: self.case.id.clone(),
            definition_id: plan_definition,
            stage_id: None,
            index: 0,
        })?;
        self.make_transition(0, Transition::Create, None)?;
        Ok(())
    }

    fn file_transition(
        &mut self,
        path: String,
        transition: CaseFileTransition,
        value: Value,
    ) -> Result<Value, CommandError> {
        self.emit(CaseEvent::CaseFileItemTransitioned {
            path: path.clone(),
            transition,
            value,
        })?;
        Ok(json!({ "path": path, "changed": true }))
    }
}

/// Run a transition on behalf of a response callback.
fn respond(case: &mut Case, tx: &mut Transaction<Case>, id: &str, transition: Transition) -> Result<(), CommandError> {
    case.notifications.clear();
    let Some(idx) = case.ids.get(id).copied() else {
        tracing::warn!(case_id = %case.id, item = %id, "Response for unknown plan item");
        return Ok(());
    };
    let mut engine = Engine::new(case, tx);
    engine.make_transition(idx, transition, None)?;
    PropagationMetrics::record_steps(Case::ENTITY_TYPE, engine.steps());
    Ok(())
}
