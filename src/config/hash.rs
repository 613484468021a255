//! Declaration hashing for change detection.
//!
//! This module provides deterministic hashing of resource declarations so the
//! planner can tell whether a resource changed since it was last applied.
//! Hashes cover the attribute expressions, not their resolved values: a
//! reference hashes as the reference itself.

use sha2::{Digest, Sha256};

use crate::graph::ResourceGraph;
use crate::model::{Expression, ResourceNode};

/// Hasher for computing declaration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationHasher;

impl DeclarationHasher {
    /// Creates a new declaration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a single resource declaration.
    #[must_use]
    pub fn hash_node(&self, node: &ResourceNode) -> String {
        let mut hasher = Sha256::new();

        update_str(&mut hasher, &node.key.resource_type);
        update_str(&mut hasher, &node.key.name);

        // BTreeMap iteration is sorted, so attribute order is stable.
        hasher.update((node.attributes.len() as u64).to_be_bytes());
        for (name, expression) in &node.attributes {
            update_str(&mut hasher, name);
            update_expression(&mut hasher, expression);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the whole graph.
    ///
    /// Independent of declaration order.
    #[must_use]
    pub fn hash_graph(&self, graph: &ResourceGraph) -> String {
        let mut node_hashes: Vec<(String, String)> = graph
            .nodes()
            .iter()
            .map(|node| (node.key.to_string(), self.hash_node(node)))
            .collect();
        node_hashes.sort();

        let mut hasher = Sha256::new();
        for (key, hash) in &node_hashes {
            update_str(&mut hasher, key);
            hasher.update(hash.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Returns a short version of a hash for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }
}

/// Length-prefixed so adjacent fields cannot run together.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn update_expression(hasher: &mut Sha256, expression: &Expression) {
    match expression {
        Expression::Literal(value) => {
            hasher.update(b"L");
            // serde_json maps are sorted, so the text form is canonical.
            update_str(hasher, &value.to_string());
        }
        Expression::Reference(reference) => {
            hasher.update(b"R");
            update_str(hasher, &reference.target.resource_type);
            update_str(hasher, &reference.target.name);
            update_str(hasher, &reference.attribute);
        }
        Expression::Concat(parts) => {
            hasher.update(b"C");
            hasher.update((parts.len() as u64).to_be_bytes());
            for part in parts {
                update_expression(hasher, part);
            }
        }
        Expression::List(items) => {
            hasher.update(b"A");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                update_expression(hasher, item);
            }
        }
        Expression::Map(entries) => {
            hasher.update(b"M");
            hasher.update((entries.len() as u64).to_be_bytes());
            for (key, value) in entries {
                update_str(hasher, key);
                update_expression(hasher, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::model::{Declarations, ResourceKey};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn node(attrs: &[(&str, serde_json::Value)]) -> ResourceNode {
        let attributes = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Expression::parse(v).unwrap()))
            .collect();
        ResourceNode::new(ResourceKey::new("cache_cluster", "sessions"), attributes)
    }

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = DeclarationHasher::new();
        let a = node(&[("engine", json!("redis")), ("nodes", json!(2))]);
        let b = node(&[("nodes", json!(2)), ("engine", json!("redis"))]);
        assert_eq!(hasher.hash_node(&a), hasher.hash_node(&b));
        assert_eq!(hasher.hash_node(&a).len(), 64);
    }

    #[test]
    fn test_hash_changes_with_attributes() {
        let hasher = DeclarationHasher::new();
        let a = node(&[("nodes", json!(2))]);
        let b = node(&[("nodes", json!(3))]);
        let c = node(&[("nodes", json!("2"))]);
        assert_ne!(hasher.hash_node(&a), hasher.hash_node(&b));
        assert_ne!(hasher.hash_node(&a), hasher.hash_node(&c));
    }

    #[test]
    fn test_reference_hash_differs_from_literal_text() {
        let hasher = DeclarationHasher::new();
        let reference = node(&[("subnet", json!("${subnet.private.id}"))]);
        let escaped = node(&[("subnet", json!("$${subnet.private.id}"))]);
        assert_ne!(hasher.hash_node(&reference), hasher.hash_node(&escaped));
    }

    #[test]
    fn test_graph_hash_ignores_declaration_order() {
        let hasher = DeclarationHasher::new();
        let mut first = Declarations::new();
        first.declare("network", "main", BTreeMap::new()).unwrap();
        first.declare("cache", "redis", BTreeMap::new()).unwrap();
        let mut second = Declarations::new();
        second.declare("cache", "redis", BTreeMap::new()).unwrap();
        second.declare("network", "main", BTreeMap::new()).unwrap();

        assert_eq!(
            hasher.hash_graph(&GraphBuilder::build(&first).unwrap()),
            hasher.hash_graph(&GraphBuilder::build(&second).unwrap())
        );
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(DeclarationHasher::short_hash("abcdef1234567890"), "abcdef123456");
        assert_eq!(DeclarationHasher::short_hash("abc"), "abc");
    }
}
