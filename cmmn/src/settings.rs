//! Settings shared by every case of a system.
//!
//! | Variable | Default |
//! |---|---|
//! | `CASEWORK_MAX_PROPAGATION_DEPTH` | 64 |
//! | `CASEWORK_MAX_PROPAGATION_STEPS` | 10000 |
//! | `CASEWORK_REACTIVATION` | `resume-only` (or `full`) |

use crate::source::{DefinitionSource, InMemoryDefinitionSource};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;

/// What reactivating a failed task or stage re-runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReactivationPolicy {
    /// Re-run every start side effect: human task activation, sub-case start,
    /// instantiation of missing stage children.
    Full,
    /// Only create the pending (Null) children of a stage.
    #[default]
    ResumeOnly,
}

impl FromStr for ReactivationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "resume-only" | "resume_only" | "resumeonly" => Ok(Self::ResumeOnly),
            other => Err(format!("Unknown reactivation policy '{other}'")),
        }
    }
}

/// Settings of the case entity type.
#[derive(Clone, Debug)]
pub struct CaseSettings {
    /// Deepest nesting of transition events within one command.
    pub max_propagation_depth: usize,
    /// Most transition events one command may propagate.
    pub max_propagation_steps: usize,
    /// Reactivation behaviour.
    pub reactivation: ReactivationPolicy,
    /// Definitions of sub-cases started by case tasks.
    pub definitions: Arc<dyn DefinitionSource>,
}

impl CaseSettings {
    /// Load settings from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_propagation_depth: env::var("CASEWORK_MAX_PROPAGATION_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|depth| *depth > 0)
                .unwrap_or(defaults.max_propagation_depth),
            max_propagation_steps: env::var("CASEWORK_MAX_PROPAGATION_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|steps| *steps > 0)
                .unwrap_or(defaults.max_propagation_steps),
            reactivation: env::var("CASEWORK_REACTIVATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reactivation),
            definitions: defaults.definitions,
        }
    }

    /// Set the depth limit.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_propagation_depth = depth;
        self
    }

    /// Set the step limit.
    #[must_use]
    pub const fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_propagation_steps = steps;
        self
    }

    /// Set the reactivation policy.
    #[must_use]
    pub const fn with_reactivation(mut self, policy: ReactivationPolicy) -> Self {
        self.reactivation = policy;
        self
    }

    /// Set where sub-case definitions are read from.
    #[must_use]
    pub fn with_definitions(mut self, definitions: Arc<dyn DefinitionSource>) -> Self {
        self.definitions = definitions;
        self
    }
}

impl Default for CaseSettings {
    fn default() -> Self {
        Self {
            max_propagation_depth: 64,
            max_propagation_steps: 10_000,
            reactivation: ReactivationPolicy::default(),
            definitions: Arc::new(InMemoryDefinitionSource::new()),
        }
    }
}
