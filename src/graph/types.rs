//! The validated resource graph.

use std::collections::HashMap;

use crate::model::{Reference, ResourceKey, ResourceNode};

/// An acyclic graph of resources and the references between them.
///
/// Built by [`super::GraphBuilder`]; once constructed it is never mutated.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    pub(super) nodes: Vec<ResourceNode>,
    pub(super) index: HashMap<ResourceKey, usize>,
    pub(super) order: Vec<usize>,
    pub(super) dependencies: Vec<Vec<ResourceKey>>,
    pub(super) dependents: Vec<Vec<ResourceKey>>,
    pub(super) references: Vec<Reference>,
}

impl ResourceGraph {
    /// Returns a graph with no resources.
    ///
    /// Planning against it deletes everything in state.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns the nodes in dependency order, ties broken by declaration order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&ResourceNode> {
        self.order.iter().map(|&i| &self.nodes[i]).collect()
    }

    /// Returns the resources `key` references, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, key: &ResourceKey) -> &[ResourceKey] {
        self.index
            .get(key)
            .map_or(&[], |&i| self.dependencies[i].as_slice())
    }

    /// Returns the resources referencing `key`, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, key: &ResourceKey) -> &[ResourceKey] {
        self.index
            .get(key)
            .map_or(&[], |&i| self.dependents[i].as_slice())
    }

    /// Returns every reference edge.
    #[must_use]
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Gets a node by key.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    /// Returns true if the graph declares `key`.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
