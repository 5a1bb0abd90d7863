//! # Casework CMMN
//!
//! The case entity: a plan of stages, tasks, milestones and events whose
//! life cycles are driven by state machines and connected by sentries.
//!
//! - **Definitions** are built in code and validated before a case starts
//! - **Plan items** live in an arena owned by the case; every state change is an event
//! - **Sentries** (entry, exit and reactivate criteria) listen to plan items and
//!   case file items, and fire when all their on-parts are active and their guard holds
//! - **The transition engine** runs the behaviour of each event in an immediate
//!   and a delayed phase, so nested criteria react before the enclosing ones
//!
//! ## Example
//!
//! ```ignore
//! use casework_cmmn::{Case, CaseCommand, CaseDefinition, PlanItemDefinition, Transition};
//! use casework_testing::EntityTest;
//!
//! let definition = CaseDefinition::new("intake", vec![PlanItemDefinition::human_task("Review", None)]);
//! let mut test = EntityTest::<Case>::new("case-1");
//! test.execute(CaseCommand::StartCase {
//!     definition: definition.into(),
//!     case_file: serde_json::Value::Null,
//!     parent: None,
//! })
//! .expect_success();
//! test.execute(CaseCommand::MakePlanItemTransition {
//!     item: "Review".into(),
//!     transition: Transition::Complete,
//! })
//! .expect_success();
//! assert_eq!(test.entity().state_of("intake"), Some(casework_cmmn::State::Completed));
//! ```

/// Plan item states, transitions and state machines
pub mod state;

/// Guards and rules over the case file
pub mod expression;

/// Case definitions
pub mod definition;

/// Where sub-case definitions come from
pub mod source;

/// The case file
pub mod case_file;

/// Plan item instances
pub mod item;

/// Criteria and their connections
pub mod sentry;

/// Case commands
pub mod command;

/// Case events
pub mod event;

/// Settings of the case entity type
pub mod settings;

/// The case entity
pub mod case;

mod engine;

pub use case::Case;
pub use case_file::{CaseFile, CaseFileTransition};
pub use command::{CaseCommand, ParentLink};
pub use definition::{CaseDefinition, CriterionDefinition, DefinitionError, ItemKind, PlanItemDefinition};
pub use event::CaseEvent;
pub use expression::Expression;
pub use item::{ItemType, PlanItem};
pub use sentry::{CriterionKind, Notification};
pub use settings::{CaseSettings, ReactivationPolicy};
pub use source::{DefinitionCache, DefinitionSource, InMemoryDefinitionSource};
pub use state::{State, StateMachine, Transition};
