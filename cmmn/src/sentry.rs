//! The sentry network: criteria, their on-parts and who listens to whom.
//!
//! Connections and on-part flags are pure functions of the event history. They
//! change only while events are folded into the case, so recovery rebuilds them
//! exactly. Firing a satisfied criterion is behaviour and happens only in the
//! transition engine, after the event was folded.
//!
//! Each source (plan item or case file item) keeps two ordered listener lists:
//! one for entry and reactivate criteria, one for exit criteria. A new listener
//! goes before the first listener whose criterion lives in a stage that strictly
//! contains the new criterion's stage, so the most deeply nested criteria hear
//! about a transition first.

use crate::case_file::{CaseFile, CaseFileTransition};
use crate::definition::{CriterionDefinition, OnPartDefinition, PlanItemDefinition};
use crate::expression::Expression;
use crate::item::{CriterionIdx, ItemIdx, PlanItem};
use crate::state::Transition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// What a criterion does when satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriterionKind {
    /// Starts (or repeats) its item.
    Entry,
    /// Ends its item.
    Exit,
    /// Reactivates its failed item.
    Reactivate,
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One subscription of a criterion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnPart {
    /// What it listens to.
    pub definition: OnPartDefinition,
    /// Whether the latest transition it heard matched.
    pub active: bool,
    /// Plan items it is connected to.
    pub connected: Vec<ItemIdx>,
}

impl OnPart {
    fn new(definition: &OnPartDefinition) -> Self {
        Self {
            definition: definition.clone(),
            active: false,
            connected: Vec::new(),
        }
    }

    /// Whether a plan item transition matches.
    #[must_use]
    pub fn matches_item(&self, transition: Transition, exit_criterion: Option<&str>) -> bool {
        match &self.definition {
            OnPartDefinition::PlanItem {
                transition: awaited,
                exit_criterion: related,
                ..
            } => *awaited == transition && related.as_deref().is_none_or(|r| exit_criterion == Some(r)),
            OnPartDefinition::CaseFile { .. } => false,
        }
    }

    /// Whether a case file transition matches.
    #[must_use]
    pub fn matches_file(&self, transition: CaseFileTransition) -> bool {
        matches!(&self.definition, OnPartDefinition::CaseFile { transition: awaited, .. } if *awaited == transition)
    }
}

/// A criterion instance, owned by one plan item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Criterion definition id.
    pub id: String,
    /// What it does.
    pub kind: CriterionKind,
    /// Plan item the criterion belongs to.
    pub owner: ItemIdx,
    /// Stage the criterion lives in.
    pub stage: ItemIdx,
    /// Guard.
    pub if_part: Option<Expression>,
    /// Subscriptions.
    pub on_parts: Vec<OnPart>,
}

impl Criterion {
    /// Whether every on-part is active and the guard holds.
    #[must_use]
    pub fn is_satisfied(&self, case_file: &Value, index: u32) -> bool {
        self.on_parts.iter().all(|on_part| on_part.active)
            && self
                .if_part
                .as_ref()
                .is_none_or(|guard| guard.evaluate(case_file, index))
    }
}

/// Reference to one on-part of one criterion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRef {
    /// Criterion.
    pub criterion: CriterionIdx,
    /// Position of the on-part within the criterion.
    pub on_part: usize,
}

/// Ordered listeners of one source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listeners {
    /// Entry and reactivate criteria, informed in the immediate phase.
    pub entry: Vec<ListenerRef>,
    /// Exit criteria, informed in the delayed phase.
    pub exit: Vec<ListenerRef>,
}

impl Listeners {
    /// The list a criterion of `kind` belongs to.
    #[must_use]
    pub fn of(&self, kind: CriterionKind) -> &[ListenerRef] {
        match kind {
            CriterionKind::Entry | CriterionKind::Reactivate => &self.entry,
            CriterionKind::Exit => &self.exit,
        }
    }

    fn of_mut(&mut self, kind: CriterionKind) -> &mut Vec<ListenerRef> {
        match kind {
            CriterionKind::Entry | CriterionKind::Reactivate => &mut self.entry,
            CriterionKind::Exit => &mut self.exit,
        }
    }
}

/// One criterion visit, recorded while a command propagates transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Criterion definition id.
    pub criterion: String,
    /// Id of the plan item owning the criterion.
    pub owner: String,
    /// What the criterion does.
    pub kind: CriterionKind,
    /// Source that transitioned (plan item id or case file path).
    pub source: String,
    /// The transition, as text.
    pub transition: String,
    /// Whether the criterion fired.
    pub fired: bool,
}

/// All criteria of a case and their connections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SentryNetwork {
    criteria: Vec<Criterion>,
    items: Vec<Listeners>,
    files: BTreeMap<String, Listeners>,
}

impl SentryNetwork {
    /// Every criterion.
    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// A criterion.
    #[must_use]
    pub fn criterion(&self, idx: CriterionIdx) -> Option<&Criterion> {
        self.criteria.get(idx)
    }

    /// Listeners of a plan item.
    #[must_use]
    pub fn item_listeners(&self, item: ItemIdx) -> Option<&Listeners> {
        self.items.get(item)
    }

    /// Listeners of a case file item.
    #[must_use]
    pub fn file_listeners(&self, path: &str) -> Option<&Listeners> {
        self.files.get(path)
    }

    /// Wire a new plan item into the network.
    ///
    /// Creates the item's criteria and connects their on-parts to every
    /// matching source, then connects existing on-parts that listen to the
    /// item's definition. On-parts of an item with index 0 are informed of
    /// the latest transition of their sources.
    pub(crate) fn item_created(
        &mut self,
        items: &mut [PlanItem],
        idx: ItemIdx,
        definition: &PlanItemDefinition,
        case_file: &CaseFile,
    ) {
        self.items.resize_with(items.len(), Listeners::default);
        let first_of_its_kind = items[idx].index == 0;
        let first_new = self.criteria.len();

        let groups: [(CriterionKind, &[CriterionDefinition]); 3] = [
            (CriterionKind::Entry, &definition.entry_criteria),
            (CriterionKind::Exit, &definition.exit_criteria),
            (CriterionKind::Reactivate, &definition.reactivate_criteria),
        ];
        for (kind, criteria) in groups {
            for criterion in criteria {
                let c = self.criteria.len();
                self.criteria.push(Criterion {
                    id: criterion.id.clone(),
                    kind,
                    owner: idx,
                    stage: scope(items, idx),
                    if_part: criterion.if_part.clone(),
                    on_parts: criterion.on_parts.iter().map(OnPart::new).collect(),
                });
                let owned = match kind {
                    CriterionKind::Entry => &mut items[idx].entry_criteria,
                    CriterionKind::Exit => &mut items[idx].exit_criteria,
                    CriterionKind::Reactivate => &mut items[idx].reactivate_criteria,
                };
                owned.push(c);

                for (p, on_part) in criterion.on_parts.iter().enumerate() {
                    match on_part {
                        OnPartDefinition::PlanItem { source, .. } => {
                            for s in 0..items.len() {
                                if &items[s].definition_id == source && self.reaches(items, c, s) {
                                    self.connect(items, ListenerRef { criterion: c, on_part: p }, s, first_of_its_kind);
                                }
                            }
                        }
                        OnPartDefinition::CaseFile { source, .. } => {
                            self.connect_file(items, ListenerRef { criterion: c, on_part: p }, source, case_file, first_of_its_kind);
                        }
                    }
                }
            }
        }

        for c in 0..first_new {
            for p in 0..self.criteria[c].on_parts.len() {
                let listens = matches!(
                    &self.criteria[c].on_parts[p].definition,
                    OnPartDefinition::PlanItem { source, .. } if *source == items[idx].definition_id
                );
                if listens && self.reaches(items, c, idx) {
                    self.connect(items, ListenerRef { criterion: c, on_part: p }, idx, false);
                }
            }
        }
    }

    /// Fold a plan item transition into the flags of its listeners.
    pub(crate) fn item_transitioned(&mut self, source: ItemIdx, transition: Transition, exit_criterion: Option<&str>) {
        let Some(listeners) = self.items.get(source) else {
            return;
        };
        for r in listeners.entry.iter().chain(&listeners.exit) {
            if let Some(on_part) = self
                .criteria
                .get_mut(r.criterion)
                .and_then(|c| c.on_parts.get_mut(r.on_part))
            {
                on_part.active = on_part.matches_item(transition, exit_criterion);
            }
        }
    }

    /// Fold a case file transition into the flags of its listeners.
    pub(crate) fn file_transitioned(&mut self, path: &str, transition: CaseFileTransition) {
        let Some(listeners) = self.files.get(path) else {
            return;
        };
        for r in listeners.entry.iter().chain(&listeners.exit) {
            if let Some(on_part) = self
                .criteria
                .get_mut(r.criterion)
                .and_then(|c| c.on_parts.get_mut(r.on_part))
            {
                on_part.active = on_part.matches_file(transition);
            }
        }
    }

    /// Whether an on-part of criterion `c` may connect to plan item `source`:
    /// their stages must lie on one line of ancestry.
    fn reaches(&self, items: &[PlanItem], c: CriterionIdx, source: ItemIdx) -> bool {
        let criterion_stage = self.criteria[c].stage;
        let source_stage = scope(items, source);
        source_stage == criterion_stage
            || strictly_contains(items, source_stage, criterion_stage)
            || strictly_contains(items, criterion_stage, source_stage)
    }

    fn connect(&mut self, items: &[PlanItem], listener: ListenerRef, source: ItemIdx, inform: bool) {
        let kind = self.criteria[listener.criterion].kind;
        insert_ordered(self.items[source].of_mut(kind), listener, &self.criteria, items);

        let on_part = &mut self.criteria[listener.criterion].on_parts[listener.on_part];
        on_part.connected.push(source);
        if inform {
            if let Some(transition) = items[source].last_transition {
                on_part.active = on_part.matches_item(transition, items[source].last_exit_criterion.as_deref());
            }
        }
    }

    fn connect_file(
        &mut self,
        items: &[PlanItem],
        listener: ListenerRef,
        path: &str,
        case_file: &CaseFile,
        inform: bool,
    ) {
        let kind = self.criteria[listener.criterion].kind;
        let listeners = self.files.entry(path.to_string()).or_default();
        insert_ordered(listeners.of_mut(kind), listener, &self.criteria, items);

        if inform {
            if let Some(item) = case_file.item(path) {
                let on_part = &mut self.criteria[listener.criterion].on_parts[listener.on_part];
                on_part.active = on_part.matches_file(item.last_transition);
            }
        }
    }
}

/// The stage an item's criteria live in; the case plan is its own scope.
pub(crate) fn scope(items: &[PlanItem], idx: ItemIdx) -> ItemIdx {
    items[idx].stage.unwrap_or(idx)
}

/// Whether `ancestor` is a proper ancestor of `item`.
pub(crate) fn strictly_contains(items: &[PlanItem], ancestor: ItemIdx, item: ItemIdx) -> bool {
    let mut current = item;
    while let Some(parent) = items[current].stage {
        if parent == ancestor {
            return true;
        }
        current = parent;
    }
    false
}

fn insert_ordered(list: &mut Vec<ListenerRef>, listener: ListenerRef, criteria: &[Criterion], items: &[PlanItem]) {
    let stage = criteria[listener.criterion].stage;
    let position = list
        .iter()
        .position(|existing| strictly_contains(items, criteria[existing.criterion].stage, stage));
    match position {
        Some(position) => list.insert(position, listener),
        None => list.push(listener),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;

    fn item(id: &str, stage: Option<ItemIdx>, item_type: ItemType) -> PlanItem {
        PlanItem::new(id.to_string(), &PlanItemDefinition::milestone(id), item_type, 0, stage)
    }

    /// plan(0) > outer(1) > inner(2); a(3) in outer, b(4) in inner.
    fn tree() -> Vec<PlanItem> {
        vec![
            item("plan", None, ItemType::CasePlan),
            item("outer", Some(0), ItemType::Stage),
            item("inner", Some(1), ItemType::Stage),
            item("a", Some(1), ItemType::Milestone),
            item("b", Some(2), ItemType::Milestone),
        ]
    }

    #[test]
    fn containment_follows_the_stage_chain() {
        let items = tree();
        assert!(strictly_contains(&items, 0, 4));
        assert!(strictly_contains(&items, 1, 2));
        assert!(!strictly_contains(&items, 2, 3));
        assert!(!strictly_contains(&items, 1, 1));
        assert_eq!(scope(&items, 0), 0);
        assert_eq!(scope(&items, 4), 2);
    }

    #[test]
    fn deeper_listeners_go_first() {
        let items = tree();
        let criterion = |stage| Criterion {
            id: format!("in-{stage}"),
            kind: CriterionKind::Exit,
            owner: 0,
            stage,
            if_part: None,
            on_parts: Vec::new(),
        };
        let criteria = vec![criterion(0), criterion(1), criterion(2), criterion(1)];
        let mut list = Vec::new();
        for c in 0..criteria.len() {
            insert_ordered(&mut list, ListenerRef { criterion: c, on_part: 0 }, &criteria, &items);
        }
        let order: Vec<_> = list.iter().map(|r| r.criterion).collect();
        assert_eq!(order, vec![2, 1, 3, 0]);
    }

    #[test]
    fn related_exit_criteria_must_match() {
        let on_part = OnPart::new(&OnPartDefinition::PlanItem {
            source: "a".into(),
            transition: Transition::Exit,
            exit_criterion: Some("Cancel".into()),
        });
        assert!(on_part.matches_item(Transition::Exit, Some("Cancel")));
        assert!(!on_part.matches_item(Transition::Exit, Some("Timeout")));
        assert!(!on_part.matches_item(Transition::Exit, None));
        assert!(!on_part.matches_file(CaseFileTransition::Create));
    }

    #[test]
    fn guards_hold_only_with_all_on_parts() {
        let mut criterion = Criterion {
            id: "c".into(),
            kind: CriterionKind::Entry,
            owner: 0,
            stage: 0,
            if_part: Some(Expression::Exists("ready".into())),
            on_parts: vec![OnPart::new(&OnPartDefinition::CaseFile {
                source: "ready".into(),
                transition: CaseFileTransition::Create,
            })],
        };
        let file = serde_json::json!({ "ready": true });
        assert!(!criterion.is_satisfied(&file, 0));

        criterion.on_parts[0].active = true;
        assert!(criterion.is_satisfied(&file, 0));
        assert!(!criterion.is_satisfied(&serde_json::json!({}), 0));
    }
}
