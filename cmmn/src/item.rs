//! Plan item instances.
//!
//! Plan items live in an arena owned by the case. Parent stages, children and
//! criteria are arena indexes, never references, so the whole graph clones and
//! serializes as plain data.

use crate::definition::{ItemKind, PlanItemDefinition};
use crate::state::{State, StateMachine, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Index of a plan item in the case arena.
pub type ItemIdx = usize;

/// Index of a criterion in the sentry network.
pub type CriterionIdx = usize;

/// What a plan item instance is, without its definition payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    /// The outermost stage.
    CasePlan,
    /// A stage.
    Stage,
    /// A human task.
    HumanTask,
    /// A case task.
    CaseTask,
    /// A milestone.
    Milestone,
    /// A user event.
    UserEvent,
    /// A timer event.
    TimerEvent,
}

impl ItemType {
    /// Type of a definition placed below the case plan.
    #[must_use]
    pub const fn of(kind: &ItemKind) -> Self {
        match kind {
            ItemKind::Stage { .. } => Self::Stage,
            ItemKind::HumanTask { .. } => Self::HumanTask,
            ItemKind::CaseTask { .. } => Self::CaseTask,
            ItemKind::Milestone => Self::Milestone,
            ItemKind::UserEvent { .. } => Self::UserEvent,
            ItemKind::TimerEvent { .. } => Self::TimerEvent,
        }
    }

    /// The state machine the type follows.
    #[must_use]
    pub const fn machine(self) -> StateMachine {
        match self {
            Self::CasePlan => StateMachine::CasePlan,
            Self::Stage | Self::HumanTask | Self::CaseTask => StateMachine::TaskStage,
            Self::Milestone | Self::UserEvent | Self::TimerEvent => StateMachine::EventMilestone,
        }
    }

    /// Whether instances contain children.
    #[must_use]
    pub const fn is_stage(self) -> bool {
        matches!(self, Self::CasePlan | Self::Stage)
    }
}

/// One plan item instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    /// Instance id.
    pub id: String,
    /// Definition id.
    pub definition_id: String,
    /// Display name.
    pub name: String,
    /// Instance type.
    pub item_type: ItemType,
    /// Repetition index among same-definition siblings.
    pub index: u32,
    /// Containing stage; `None` for the case plan.
    pub stage: Option<ItemIdx>,
    /// Children, for stages.
    pub children: Vec<ItemIdx>,
    /// Current state.
    pub state: State,
    /// State before the last transition.
    pub history_state: State,
    /// Most recent transition.
    pub last_transition: Option<Transition>,
    /// Exit criterion behind the most recent transition.
    pub last_exit_criterion: Option<String>,
    /// Outcome of the repetition rule.
    pub repeats: bool,
    /// Outcome of the required rule.
    pub required: bool,
    /// Entry criteria.
    pub entry_criteria: SmallVec<[CriterionIdx; 2]>,
    /// Exit criteria.
    pub exit_criteria: SmallVec<[CriterionIdx; 2]>,
    /// Reactivate criteria.
    pub reactivate_criteria: SmallVec<[CriterionIdx; 2]>,
    /// How often a human task was activated.
    pub activations: u32,
    /// Due time of a timer event.
    pub timer_due: Option<DateTime<Utc>>,
}

impl PlanItem {
    /// A fresh instance in state Null.
    #[must_use]
    pub fn new(
        id: String,
        definition: &PlanItemDefinition,
        item_type: ItemType,
        index: u32,
        stage: Option<ItemIdx>,
    ) -> Self {
        Self {
            id,
            definition_id: definition.id.clone(),
            name: definition.name.clone(),
            item_type,
            index,
            stage,
            children: Vec::new(),
            state: State::Null,
            history_state: State::Null,
            last_transition: None,
            last_exit_criterion: None,
            repeats: false,
            required: false,
            entry_criteria: SmallVec::new(),
            exit_criteria: SmallVec::new(),
            reactivate_criteria: SmallVec::new(),
            activations: 0,
            timer_due: None,
        }
    }

    /// The state machine of the item.
    #[must_use]
    pub const fn machine(&self) -> StateMachine {
        self.item_type.machine()
    }

    /// Record a transition.
    pub(crate) fn transitioned(&mut self, transition: Transition, to: State, exit_criterion: Option<&str>) {
        self.history_state = self.state;
        self.state = to;
        self.last_transition = Some(transition);
        self.last_exit_criterion = exit_criterion.map(str::to_string);
    }
}
