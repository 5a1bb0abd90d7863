//! Guard expressions of criteria and plan item rules.
//!
//! Expressions are evaluated against the case file (a JSON object) and the
//! repetition index of the plan item they belong to. Paths are dot separated
//! (`order.lines`), and a missing path never matches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boolean expression over the case file.
///
/// # Example
///
/// ```
/// use casework_cmmn::expression::Expression;
/// use serde_json::json;
///
/// let approved = Expression::Equals { path: "review.outcome".into(), value: json!("approved") };
/// let case_file = json!({ "review": { "outcome": "approved" } });
///
/// assert!(approved.evaluate(&case_file, 0));
/// assert!(!Expression::Not(Box::new(approved)).evaluate(&case_file, 0));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Always this value.
    Constant(bool),
    /// The path holds a non-null value.
    Exists(String),
    /// The value at the path equals `value`.
    Equals {
        /// Dot separated path.
        path: String,
        /// Expected value.
        value: Value,
    },
    /// The number at the path is greater than `value`.
    GreaterThan {
        /// Dot separated path.
        path: String,
        /// Bound.
        value: f64,
    },
    /// The item's repetition index is below the bound.
    IndexBelow(u32),
    /// Negation.
    Not(Box<Expression>),
    /// Every sub-expression holds (true when empty).
    All(Vec<Expression>),
    /// Some sub-expression holds (false when empty).
    Any(Vec<Expression>),
}

impl Expression {
    /// Evaluate against the case file, for an item with repetition `index`.
    #[must_use]
    pub fn evaluate(&self, case_file: &Value, index: u32) -> bool {
        match self {
            Self::Constant(value) => *value,
            Self::Exists(path) => lookup(case_file, path).is_some_and(|v| !v.is_null()),
            Self::Equals { path, value } => lookup(case_file, path) == Some(value),
            Self::GreaterThan { path, value } => lookup(case_file, path)
                .and_then(Value::as_f64)
                .is_some_and(|n| n > *value),
            Self::IndexBelow(bound) => index < *bound,
            Self::Not(inner) => !inner.evaluate(case_file, index),
            Self::All(all) => all.iter().all(|e| e.evaluate(case_file, index)),
            Self::Any(any) => any.iter().any(|e| e.evaluate(case_file, index)),
        }
    }
}

/// Value at a dot separated path.
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Evaluate an optional rule, using `default` when absent.
pub(crate) fn rule_holds(rule: Option<&Expression>, default: bool, case_file: &Value, index: u32) -> bool {
    rule.map_or(default, |rule| rule.evaluate(case_file, index))
}
