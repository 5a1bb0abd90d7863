//! The case file: the data of a case, organised in named items.
//!
//! Every change to an item is a [`CaseFileTransition`] that is published through
//! the sentry network just like plan item transitions.

use crate::expression::lookup;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A case file item transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseFileTransition {
    /// The item got its first value.
    Create,
    /// The value was merged with new content.
    Update,
    /// The value was replaced.
    Replace,
    /// The item was removed.
    Delete,
}

impl fmt::Display for CaseFileTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of a case file item.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseFileItemState {
    /// Holds a value.
    Available,
    /// Deleted.
    Discarded,
}

/// Bookkeeping of one case file item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFileItem {
    /// Current state.
    pub state: CaseFileItemState,
    /// Most recent transition.
    pub last_transition: CaseFileTransition,
}

/// Case data plus the state of each item ever written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseFile {
    data: Value,
    items: BTreeMap<String, CaseFileItem>,
}

impl Default for CaseFile {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            items: BTreeMap::new(),
        }
    }
}

impl CaseFile {
    /// All case data as one JSON object.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Value at a dot separated path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, path)
    }

    /// Bookkeeping of the item at `path`.
    #[must_use]
    pub fn item(&self, path: &str) -> Option<&CaseFileItem> {
        self.items.get(path)
    }

    /// Whether the item at `path` currently holds a value.
    #[must_use]
    pub fn is_available(&self, path: &str) -> bool {
        self.item(path)
            .is_some_and(|item| item.state == CaseFileItemState::Available)
    }

    /// The value `path` would hold after merging `patch` into it.
    #[must_use]
    pub fn merged(&self, path: &str, patch: &Value) -> Value {
        let mut value = self.get(path).cloned().unwrap_or(Value::Null);
        merge(&mut value, patch);
        value
    }

    /// Record a transition. `value` is the item's new content (ignored on delete).
    pub(crate) fn transition(&mut self, path: &str, transition: CaseFileTransition, value: &Value) {
        let state = if transition == CaseFileTransition::Delete {
            remove_path(&mut self.data, path);
            CaseFileItemState::Discarded
        } else {
            set_path(&mut self.data, path, value.clone());
            CaseFileItemState::Available
        };
        self.items.insert(
            path.to_string(),
            CaseFileItem {
                state,
                last_transition: transition,
            },
        );
    }
}

/// Merge `patch` into `target`: objects merge key by key, anything else replaces.
pub(crate) fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if !segments.is_empty() {
        set_in(root, &segments, value);
    }
}

fn set_in(target: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        set_in(map.entry((*head).to_string()).or_insert(Value::Null), rest, value);
    }
}

fn remove_path(root: &mut Value, path: &str) {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (lookup_mut(root, parent), last),
        None => (Some(root), path),
    };
    if let Some(Value::Object(map)) = parent {
        map.remove(last);
    }
}

fn lookup_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get_mut(segment))
}
