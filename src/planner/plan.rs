//! Change plan types and ordering.
//!
//! A [`ChangePlan`] is an ordered list of [`ChangeAction`]s whose
//! `dependencies` point at earlier actions in the same list. Plans are built
//! once by the planner and never mutated afterwards.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::PlanError;
use crate::model::{ResourceKey, ResourceNode};
use crate::provider::AttributeChange;
use crate::state::StateRecord;

/// A complete change plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangePlan {
    /// Hash of the graph this plan was computed from.
    pub graph_hash: String,
    /// Actions in execution order.
    pub actions: Vec<ChangeAction>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeAction {
    /// What to do.
    pub kind: ActionKind,
    /// Resource acted on.
    pub key: ResourceKey,
    /// Declared node, for everything but deletes.
    pub node: Option<ResourceNode>,
    /// Record the action starts from, for updates and deletes.
    pub prior: Option<StateRecord>,
    /// Hash of the declaration being applied.
    pub declaration_hash: Option<String>,
    /// Indices of actions that must complete first.
    pub dependencies: Vec<usize>,
    /// Attribute-level changes, as far as they are known before apply.
    pub changes: Vec<AttributeChange>,
    /// True for the two halves of a delete-then-create replacement.
    pub replacement: bool,
    /// Why the action was planned.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    NoOp,
}

/// Counts of actions by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create (excluding replacements).
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete (excluding replacements).
    pub delete: usize,
    /// Unchanged resources.
    pub unchanged: usize,
}

impl ChangePlan {
    /// Orders draft actions so every action follows its dependencies.
    ///
    /// Among ready actions the earliest drafted goes first, so the result is
    /// reproducible. Dependencies are remapped to final indices.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DependencyResolutionFailed`] if the action
    /// dependencies form a cycle.
    pub fn ordered(graph_hash: String, draft: Vec<ChangeAction>) -> Result<Self, PlanError> {
        let count = draft.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, action) in draft.iter().enumerate() {
            for &dependency in &action.dependencies {
                if dependency >= count {
                    return Err(PlanError::DependencyResolutionFailed {
                        message: format!(
                            "action for {} depends on unknown action {dependency}",
                            action.key
                        ),
                    });
                }
                in_degree[index] += 1;
                dependents[dependency].push(index);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let stuck: Vec<String> = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| format!("{} {}", draft[i].kind, draft[i].key))
                .collect();
            return Err(PlanError::DependencyResolutionFailed {
                message: format!("cyclic action dependencies among: {}", stuck.join(", ")),
            });
        }

        let mut position = vec![0usize; count];
        for (new_index, &old_index) in order.iter().enumerate() {
            position[old_index] = new_index;
        }

        let mut slots: Vec<Option<ChangeAction>> = draft.into_iter().map(Some).collect();
        let actions = order
            .iter()
            .filter_map(|&old_index| slots[old_index].take())
            .map(|mut action| {
                let mut remapped: Vec<usize> =
                    action.dependencies.iter().map(|&d| position[d]).collect();
                remapped.sort_unstable();
                remapped.dedup();
                action.dependencies = remapped;
                action
            })
            .collect();

        Ok(Self {
            graph_hash,
            actions,
        })
    }

    /// Returns true if the plan has no actions at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns true if any action changes something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.kind != ActionKind::NoOp)
    }

    /// Returns the actions that change something.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeAction> {
        self.actions.iter().filter(|a| a.kind != ActionKind::NoOp)
    }

    /// Counts actions by kind. A replacement counts once.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match (action.kind, action.replacement) {
                (ActionKind::Create, true) => summary.replace += 1,
                (ActionKind::Create, false) => summary.create += 1,
                (ActionKind::Update, _) => summary.update += 1,
                (ActionKind::Delete, false) => summary.delete += 1,
                (ActionKind::NoOp, _) => summary.unchanged += 1,
                (ActionKind::Delete, true) => {}
            }
        }
        summary
    }

    /// Returns the indices of actions depending directly on `index`.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.dependencies.contains(&index))
            .map(|(i, _)| i)
            .collect()
    }
}

impl ChangeAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match (self.kind, self.replacement) {
            (ActionKind::Create, true) => format!("Recreate {}", self.key),
            (ActionKind::Create, false) => format!("Create {}", self.key),
            (ActionKind::Update, _) => format!("Update {}", self.key),
            (ActionKind::Delete, true) => format!("Destroy {} for replacement", self.key),
            (ActionKind::Delete, false) => format!("Delete {}", self.key),
            (ActionKind::NoOp, _) => format!("No change for {}", self.key),
        }
    }

    /// Returns the provider identity this action starts from.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.prior.as_ref().map(|r| r.provider_id.as_str())
    }
}

impl PlanSummary {
    /// Returns a one-line summary.
    #[must_use]
    pub fn line(&self) -> String {
        format!(
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for ChangePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Change plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            if action.kind != ActionKind::NoOp {
                writeln!(f, "  {i}. {action}")?;
            }
        }
        write!(f, "{}", self.summary().line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(kind: ActionKind, name: &str, dependencies: Vec<usize>) -> ChangeAction {
        ChangeAction {
            kind,
            key: ResourceKey::new("node", name),
            node: None,
            prior: None,
            declaration_hash: None,
            dependencies,
            changes: vec![],
            replacement: false,
            reason: String::new(),
        }
    }

    #[test]
    fn test_ordering_remaps_dependencies() {
        let draft = vec![
            action(ActionKind::Create, "b", vec![1]),
            action(ActionKind::Create, "a", vec![]),
            action(ActionKind::NoOp, "c", vec![]),
        ];
        let plan = ChangePlan::ordered(String::from("h"), draft).unwrap();

        let names: Vec<&str> = plan.actions.iter().map(|a| a.key.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
        assert_eq!(plan.actions[2].dependencies, vec![0]);
        assert_eq!(plan.dependents_of(0), vec![2]);
    }

    #[test]
    fn test_cyclic_actions_fail() {
        let draft = vec![
            action(ActionKind::Delete, "a", vec![1]),
            action(ActionKind::Delete, "b", vec![0]),
        ];
        let err = ChangePlan::ordered(String::from("h"), draft).unwrap_err();
        assert!(err.to_string().contains("delete node.a"));
    }

    #[test]
    fn test_summary_counts_replacement_once() {
        let mut delete = action(ActionKind::Delete, "a", vec![]);
        delete.replacement = true;
        let mut create = action(ActionKind::Create, "a", vec![0]);
        create.replacement = true;
        let plan = ChangePlan::ordered(
            String::from("h"),
            vec![delete, create, action(ActionKind::NoOp, "b", vec![])],
        )
        .unwrap();

        let summary = plan.summary();
        assert_eq!(summary.replace, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.create + summary.delete + summary.update, 0);
        assert!(plan.has_changes());
    }
}
