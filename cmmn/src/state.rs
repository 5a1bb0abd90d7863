//! States, transitions and the three state machines of plan items.
//!
//! Each kind of plan item follows one fixed table:
//!
//! | Machine | Used by | Exit transition | Termination transition |
//! |---|---|---|---|
//! | [`StateMachine::EventMilestone`] | milestones, user events, timer events | `Exit` | `ParentTerminate` |
//! | [`StateMachine::TaskStage`] | tasks and stages | `Exit` | `Exit` |
//! | [`StateMachine::CasePlan`] | the case plan | `Terminate` | `Exit` |
//!
//! A transition that is not in the table for the current state has no effect.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Life cycle state of a plan item.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Not yet created.
    #[default]
    Null,
    /// Created, waiting for its entry transition.
    Available,
    /// Waiting for a manual start.
    Enabled,
    /// Manually disabled.
    Disabled,
    /// Running.
    Active,
    /// Suspended, by itself or by its stage.
    Suspended,
    /// Failed, may be reactivated.
    Failed,
    /// Completed.
    Completed,
    /// Terminated.
    Terminated,
    /// Closed (case plan only).
    Closed,
}

impl State {
    /// Whether the item still has to be created.
    #[must_use]
    pub const fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the item is running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// States a stage accepts as "done" when checking for completion.
    #[must_use]
    pub const fn is_semi_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Terminated | Self::Disabled | Self::Failed | Self::Closed
        )
    }

    /// States nothing leaves except through reactivation of the case plan.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Closed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A plan item transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Null to Available (Active for the case plan).
    Create,
    /// Available to Enabled.
    Enable,
    /// Available to Active.
    Start,
    /// Enabled to Disabled.
    Disable,
    /// Enabled to Active.
    ManualStart,
    /// Suspend the item.
    Suspend,
    /// Active to Failed.
    Fault,
    /// Active to Completed.
    Complete,
    /// Terminate the item.
    Terminate,
    /// Exit through an exit criterion or a stage ending.
    Exit,
    /// Suspended back to Active.
    Resume,
    /// Failed (or finished, for the case plan) back to Active.
    Reactivate,
    /// Disabled back to Enabled.
    Reenable,
    /// The stage was suspended.
    ParentSuspend,
    /// The stage was resumed.
    ParentResume,
    /// The stage was terminated.
    ParentTerminate,
    /// An event or milestone happened.
    Occur,
    /// Close a finished case plan.
    Close,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a transition leads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Target {
    To(State),
    History,
}

/// One of the three plan item state machines.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateMachine {
    /// Milestones, user events and timer events.
    EventMilestone,
    /// Human tasks, case tasks and stages.
    TaskStage,
    /// The case plan.
    CasePlan,
}

impl StateMachine {
    /// Transition used by exit criteria.
    #[must_use]
    pub const fn exit_transition(self) -> Transition {
        match self {
            Self::EventMilestone | Self::TaskStage => Transition::Exit,
            Self::CasePlan => Transition::Terminate,
        }
    }

    /// Transition a terminating stage sends to its children.
    #[must_use]
    pub const fn termination_transition(self) -> Transition {
        match self {
            Self::EventMilestone => Transition::ParentTerminate,
            Self::TaskStage | Self::CasePlan => Transition::Exit,
        }
    }

    /// State reached by `transition` from `current`, or `None` if the
    /// transition is not allowed.
    ///
    /// `history` is the state before the current one; `ParentResume` of tasks
    /// and stages returns to it.
    #[must_use]
    pub fn target(self, current: State, transition: Transition, history: State) -> Option<State> {
        let target = match self {
            Self::EventMilestone => event_milestone(current, transition),
            Self::TaskStage => task_stage(current, transition),
            Self::CasePlan => case_plan(current, transition),
        }?;
        Some(match target {
            Target::To(state) => state,
            Target::History => history,
        })
    }
}

fn event_milestone(current: State, transition: Transition) -> Option<Target> {
    use State::{Available, Completed, Null, Suspended, Terminated};
    use Transition::{Create, Occur, ParentResume, ParentSuspend, ParentTerminate, Resume, Suspend, Terminate};

    let to = match (current, transition) {
        (Null, Create) | (Suspended, Resume | ParentResume) => Available,
        (Available, Suspend | ParentSuspend) => Suspended,
        (Available, Terminate) | (Available | Suspended, ParentTerminate) => Terminated,
        (Available, Occur) => Completed,
        _ => return None,
    };
    Some(Target::To(to))
}

fn task_stage(current: State, transition: Transition) -> Option<Target> {
    use State::{Active, Available, Completed, Disabled, Enabled, Failed, Null, Suspended, Terminated};
    use Transition::{
        Complete, Create, Disable, Enable, Exit, Fault, ManualStart, ParentResume, ParentSuspend, Reactivate,
        Reenable, Resume, Start, Suspend, Terminate,
    };

    let to = match (current, transition) {
        (Null, Create) => Available,
        (Available, Enable) | (Disabled, Reenable) => Enabled,
        (Available, Start) | (Enabled, ManualStart) | (Suspended, Resume) | (Failed, Reactivate) => Active,
        (Enabled, Disable) => Disabled,
        (Active, Suspend) | (Available | Active | Enabled | Disabled, ParentSuspend) => Suspended,
        (Active, Fault) => Failed,
        (Active, Complete) => Completed,
        (Active, Terminate) | (Available | Active | Enabled | Disabled | Suspended | Failed, Exit) => Terminated,
        (Suspended, ParentResume) => return Some(Target::History),
        _ => return None,
    };
    Some(Target::To(to))
}

fn case_plan(current: State, transition: Transition) -> Option<Target> {
    use State::{Active, Closed, Completed, Failed, Null, Suspended, Terminated};
    use Transition::{Close, Complete, Create, Fault, Reactivate, Suspend, Terminate};

    let to = match (current, transition) {
        (Null, Create) | (Completed | Terminated | Failed | Suspended, Reactivate) => Active,
        (Active, Suspend) => Suspended,
        (Active, Terminate) => Terminated,
        (Active, Complete) => Completed,
        (Active, Fault) => Failed,
        (Completed | Terminated | Failed | Suspended, Close) => Closed,
        _ => return None,
    };
    Some(Target::To(to))
}
