//! Change planning.
//!
//! The [`Planner`] compares a [`ResourceGraph`] against the recorded state and
//! produces a [`ChangePlan`]. Planning is pure: the same graph and records
//! always yield the same plan.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use super::diff::{addition_changes, preview_attributes, removal_changes};
use super::plan::{ActionKind, ChangeAction, ChangePlan};
use crate::config::DeclarationHasher;
use crate::error::Result;
use crate::graph::{ResourceGraph, reachable};
use crate::model::{ResourceKey, ResourceNode};
use crate::provider::{AttributeDiff, ResourceType, ResourceTypeRegistry};
use crate::state::{StateSnapshot, StateStore};

/// Computes change plans.
#[derive(Debug)]
pub struct Planner<'a> {
    registry: &'a ResourceTypeRegistry,
    hasher: DeclarationHasher,
}

/// Bookkeeping while drafting actions.
#[derive(Default)]
struct Draft {
    actions: Vec<ChangeAction>,
    /// Delete action per key, orphan or replacement.
    deletes: HashMap<ResourceKey, usize>,
    /// Last action per declared key.
    finals: HashMap<ResourceKey, usize>,
    /// Declared keys whose provider identity changes in this plan.
    new_identity: BTreeSet<ResourceKey>,
}

impl<'a> Planner<'a> {
    /// Creates a planner resolving types through `registry`.
    #[must_use]
    pub const fn new(registry: &'a ResourceTypeRegistry) -> Self {
        Self {
            registry,
            hasher: DeclarationHasher::new(),
        }
    }

    /// Plans against the records currently in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or planning fails.
    pub async fn plan_with_store(
        &self,
        graph: &ResourceGraph,
        store: &dyn StateStore,
    ) -> Result<ChangePlan> {
        let records = store.load().await?;
        self.plan(graph, &records)
    }

    /// Plans the deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorded type is unknown.
    pub fn plan_destroy(&self, records: &StateSnapshot) -> Result<ChangePlan> {
        self.plan(&ResourceGraph::empty(), records)
    }

    /// Plans the changes that bring `records` in line with `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GraphError::UnknownResourceType`] if a declared
    /// or recorded type is not registered, and
    /// [`crate::error::PlanError::DependencyResolutionFailed`] if the actions
    /// cannot be ordered.
    pub fn plan(&self, graph: &ResourceGraph, records: &StateSnapshot) -> Result<ChangePlan> {
        for node in graph.nodes() {
            self.registry.for_key(&node.key)?;
        }
        for key in records.keys().filter(|k| !graph.contains(k)) {
            self.registry.for_key(key)?;
        }

        let mut draft = Draft::default();

        for key in orphan_order(graph, records) {
            let record = &records[&key];
            debug!("{} is no longer declared", key);
            let index = draft.push(ChangeAction {
                kind: ActionKind::Delete,
                key: key.clone(),
                node: None,
                prior: Some(record.clone()),
                declaration_hash: None,
                dependencies: Vec::new(),
                changes: removal_changes(record),
                replacement: false,
                reason: String::from("no longer declared"),
            });
            draft.deletes.insert(key, index);
        }

        for node in graph.topological_order() {
            let resource_type = self.registry.for_key(&node.key)?;
            self.plan_node(graph, records, node, resource_type.as_ref(), &mut draft);
        }

        draft.order_deletes(graph, records);

        let plan = ChangePlan::ordered(self.hasher.hash_graph(graph), draft.actions)?;
        info!("Planned {}", plan.summary().line());
        Ok(plan)
    }

    fn plan_node(
        &self,
        graph: &ResourceGraph,
        records: &StateSnapshot,
        node: &ResourceNode,
        resource_type: &dyn ResourceType,
        draft: &mut Draft,
    ) {
        let key = &node.key;
        let hash = self.hasher.hash_node(node);
        let upstream: Vec<usize> = graph
            .dependencies_of(key)
            .iter()
            .filter_map(|dependency| draft.finals.get(dependency).copied())
            .collect();

        let Some(record) = records.get(key) else {
            debug!("{} needs to be created", key);
            let preview = preview_attributes(node, records, &draft.new_identity);
            draft.new_identity.insert(key.clone());
            let index = draft.push(ChangeAction {
                kind: ActionKind::Create,
                key: key.clone(),
                node: Some(node.clone()),
                prior: None,
                declaration_hash: Some(hash),
                dependencies: upstream,
                changes: addition_changes(&preview),
                replacement: false,
                reason: String::from("not yet created"),
            });
            draft.finals.insert(key.clone(), index);
            return;
        };

        let moved_dependency = graph
            .dependencies_of(key)
            .iter()
            .find(|dependency| draft.new_identity.contains(*dependency));

        if record.declaration_hash == hash && moved_dependency.is_none() {
            debug!("{} is up to date", key);
            let index = draft.push(ChangeAction {
                kind: ActionKind::NoOp,
                key: key.clone(),
                node: Some(node.clone()),
                prior: Some(record.clone()),
                declaration_hash: Some(hash),
                dependencies: upstream,
                changes: Vec::new(),
                replacement: false,
                reason: String::from("up to date"),
            });
            draft.finals.insert(key.clone(), index);
            return;
        }

        let reason = moved_dependency.map_or_else(
            || String::from("declaration changed"),
            |dependency| format!("dependency {dependency} gets a new identity"),
        );
        let preview = preview_attributes(node, records, &draft.new_identity);
        let diff = resource_type.diff_attributes(&record.attributes, &preview);

        if diff.requires_replacement {
            debug!("{} must be replaced", key);
            let reason = format!("replacement: {}", replacement_cause(resource_type, &diff));
            draft.new_identity.insert(key.clone());

            let delete = draft.push(ChangeAction {
                kind: ActionKind::Delete,
                key: key.clone(),
                node: None,
                prior: Some(record.clone()),
                declaration_hash: None,
                dependencies: Vec::new(),
                changes: diff.changes.clone(),
                replacement: true,
                reason: reason.clone(),
            });
            draft.deletes.insert(key.clone(), delete);

            let mut dependencies = upstream;
            dependencies.push(delete);
            let create = draft.push(ChangeAction {
                kind: ActionKind::Create,
                key: key.clone(),
                node: Some(node.clone()),
                prior: Some(record.clone()),
                declaration_hash: Some(hash),
                dependencies,
                changes: diff.changes,
                replacement: true,
                reason,
            });
            draft.finals.insert(key.clone(), create);
        } else {
            debug!("{} will be updated in place ({})", key, reason);
            let index = draft.push(ChangeAction {
                kind: ActionKind::Update,
                key: key.clone(),
                node: Some(node.clone()),
                prior: Some(record.clone()),
                declaration_hash: Some(hash),
                dependencies: upstream,
                changes: diff.changes,
                replacement: false,
                reason,
            });
            draft.finals.insert(key.clone(), index);
        }
    }
}

impl Draft {
    fn push(&mut self, action: ChangeAction) -> usize {
        self.actions.push(action);
        self.actions.len() - 1
    }

    /// Makes deletes wait for whatever still uses the deleted resource.
    fn order_deletes(&mut self, graph: &ResourceGraph, records: &StateSnapshot) {
        let mut deletes: Vec<(ResourceKey, usize)> =
            self.deletes.iter().map(|(k, &i)| (k.clone(), i)).collect();
        deletes.sort();

        // A recorded user that is itself deleted goes first.
        for (user, user_delete) in &deletes {
            let Some(record) = records.get(user) else {
                continue;
            };
            for used in &record.dependencies {
                if let Some(&used_delete) = self.deletes.get(used)
                    && used_delete != *user_delete
                {
                    self.add_dependency(used_delete, *user_delete);
                }
            }
        }

        // A declared former user must move off an orphan before it goes.
        for node in graph.nodes() {
            if self.deletes.contains_key(&node.key) {
                continue;
            }
            let (Some(record), Some(&user_final)) =
                (records.get(&node.key), self.finals.get(&node.key))
            else {
                continue;
            };
            for used in &record.dependencies {
                if graph.contains(used) {
                    continue;
                }
                let Some(&orphan_delete) = self.deletes.get(used) else {
                    continue;
                };
                let edges: Vec<Vec<usize>> =
                    self.actions.iter().map(|a| a.dependencies.clone()).collect();
                if reachable(&edges, user_final).contains(&orphan_delete) {
                    debug!(
                        "Not ordering delete of {} after {}: would form a cycle",
                        used, node.key
                    );
                    continue;
                }
                self.add_dependency(orphan_delete, user_final);
            }
        }
    }

    fn add_dependency(&mut self, action: usize, dependency: usize) {
        let dependencies = &mut self.actions[action].dependencies;
        if !dependencies.contains(&dependency) {
            dependencies.push(dependency);
        }
    }
}

/// Orders orphaned records so users are deleted before what they used.
///
/// Ties are broken by key. Records caught in a dependency cycle keep key
/// order; ordering the actions then reports the cycle.
fn orphan_order(graph: &ResourceGraph, records: &StateSnapshot) -> Vec<ResourceKey> {
    let orphans: BTreeSet<&ResourceKey> = records.keys().filter(|k| !graph.contains(k)).collect();

    // users[x] = orphans whose record references x
    let mut users: HashMap<&ResourceKey, usize> = HashMap::new();
    for key in &orphans {
        for used in records[*key].dependencies.iter().filter(|d| orphans.contains(d)) {
            *users.entry(used).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<&ResourceKey> = orphans
        .iter()
        .copied()
        .filter(|k| users.get(k).copied().unwrap_or(0) == 0)
        .collect();
    let mut order = Vec::with_capacity(orphans.len());
    let mut emitted = BTreeSet::new();

    while let Some(next) = ready.pop_first() {
        order.push(next.clone());
        emitted.insert(next);
        for used in records[next].dependencies.iter() {
            if let Some(remaining) = users.get_mut(used) {
                *remaining -= 1;
                if *remaining == 0 && orphans.contains(used) {
                    ready.insert(used);
                }
            }
        }
    }

    order.extend(
        orphans
            .into_iter()
            .filter(|k| !emitted.contains(k))
            .cloned(),
    );
    order
}

fn replacement_cause(resource_type: &dyn ResourceType, diff: &AttributeDiff) -> String {
    if !resource_type.supports_in_place_update() {
        return format!("{} cannot be updated in place", resource_type.type_name());
    }
    let names: Vec<&str> = diff.changes.iter().map(|c| c.attribute.as_str()).collect();
    format!("changing {} forces a new resource", names.join(", "))
}
