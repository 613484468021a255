//! Graph construction and topological validation.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, info};

use super::types::ResourceGraph;
use crate::error::GraphError;
use crate::model::{Declarations, ResourceKey};

/// Builds a [`ResourceGraph`] from declarations.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl GraphBuilder {
    /// Resolves references, rejects cycles, and computes a deterministic
    /// topological order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownReference`] for a reference to an
    /// undeclared resource and [`GraphError::CyclicDependency`] with the full
    /// cycle path when references loop.
    pub fn build(declarations: &Declarations) -> Result<ResourceGraph, GraphError> {
        let references = declarations.resolve_references()?;
        let nodes = declarations.nodes().to_vec();
        let count = nodes.len();

        // deps[i] holds the declaration positions node i references.
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        for reference in &references {
            let (Some(from), Some(to)) = (
                declarations.position(&reference.from),
                declarations.position(&reference.to),
            ) else {
                return Err(GraphError::UnknownReference {
                    from: reference.from.clone(),
                    attribute: reference.attribute.clone(),
                    target: reference.to.clone(),
                });
            };
            deps[from].insert(to);
        }

        if let Some(cycle) = find_cycle(&deps) {
            let cycle: Vec<ResourceKey> = cycle.into_iter().map(|i| nodes[i].key.clone()).collect();
            debug!("Cycle detected: {:?}", cycle);
            return Err(GraphError::CyclicDependency { cycle });
        }

        let order = topological_sort(&deps);

        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        for (consumer, producers) in deps.iter().enumerate() {
            for &producer in producers {
                dependents[producer].insert(consumer);
            }
        }

        let to_keys = |set: &BTreeSet<usize>| -> Vec<ResourceKey> {
            set.iter().map(|&i| nodes[i].key.clone()).collect()
        };
        let dependencies = deps.iter().map(to_keys).collect();
        let dependents = dependents.iter().map(to_keys).collect();

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.key.clone(), i))
            .collect();

        info!(
            "Built resource graph: {} resources, {} references",
            count,
            references.len()
        );

        Ok(ResourceGraph {
            nodes,
            index,
            order,
            dependencies,
            dependents,
            references,
        })
    }
}

/// Iterative depth-first search over dependency edges.
///
/// Returns the first cycle found as a path whose last element repeats the
/// first.
fn find_cycle(deps: &[BTreeSet<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; deps.len()];

    for root in 0..deps.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        marks[root] = Mark::Visiting;
        let mut path = vec![root];
        let mut stack = vec![deps[root].iter()];

        while let Some(children) = stack.last_mut() {
            if let Some(&next) = children.next() {
                match marks[next] {
                    Mark::Visiting => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks[next] = Mark::Visiting;
                        path.push(next);
                        stack.push(deps[next].iter());
                    }
                    Mark::Done => {}
                }
            } else {
                stack.pop();
                if let Some(finished) = path.pop() {
                    marks[finished] = Mark::Done;
                }
            }
        }
    }

    None
}

/// Kahn's algorithm; among ready nodes the earliest declared goes first.
fn topological_sort(deps: &[BTreeSet<usize>]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (consumer, producers) in deps.iter().enumerate() {
        for &producer in producers {
            dependents[producer].push(consumer);
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &consumer in &dependents[next] {
            in_degree[consumer] -= 1;
            if in_degree[consumer] == 0 {
                ready.insert(consumer);
            }
        }
    }

    order
}

/// Returns the nodes reachable from `start` by following `edges`, excluding
/// `start` itself unless it lies on a cycle.
pub(crate) fn reachable(edges: &[Vec<usize>], start: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<usize> = edges[start].iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        if seen.insert(node) {
            queue.extend(edges[node].iter().copied());
        }
    }
    seen
}
