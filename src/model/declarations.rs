//! The set of declared resources, in declaration order.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::expr::Expression;
use super::node::{Reference, ResourceKey, ResourceNode};
use crate::error::GraphError;

/// Declared resources, indexed by key.
///
/// Declaration order is retained; it is the tie-breaker for every ordering
/// decision the engine makes.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceKey, usize>,
}

impl Declarations {
    /// Creates an empty declaration set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateResource`] if `(resource_type, name)` is
    /// already declared.
    pub fn declare(
        &mut self,
        resource_type: impl Into<String>,
        name: impl Into<String>,
        attributes: BTreeMap<String, Expression>,
    ) -> Result<&ResourceNode, GraphError> {
        let key = ResourceKey::new(resource_type, name);
        if self.index.contains_key(&key) {
            return Err(GraphError::DuplicateResource { key });
        }

        debug!("Declared {}", key);
        let position = self.nodes.len();
        self.index.insert(key.clone(), position);
        self.nodes.push(ResourceNode::new(key, attributes));
        Ok(&self.nodes[position])
    }

    /// Walks every attribute expression and returns one edge per output
    /// reference, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownReference`] for the first reference to an
    /// undeclared resource.
    pub fn resolve_references(&self) -> Result<Vec<Reference>, GraphError> {
        let mut edges = Vec::new();

        for node in &self.nodes {
            for (attribute, output) in node.references() {
                if !self.index.contains_key(&output.target) {
                    return Err(GraphError::UnknownReference {
                        from: node.key.clone(),
                        attribute: attribute.to_string(),
                        target: output.target.clone(),
                    });
                }
                edges.push(Reference {
                    from: node.key.clone(),
                    attribute: attribute.to_string(),
                    to: output.target.clone(),
                    output: output.attribute.clone(),
                });
            }
        }

        Ok(edges)
    }

    /// Gets a declared node.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    /// Returns the declaration position of a key.
    #[must_use]
    pub fn position(&self, key: &ResourceKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Returns the nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, Expression> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Expression::parse(&json!(v)).unwrap()))
            .collect()
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let mut decls = Declarations::new();
        decls.declare("network", "main", BTreeMap::new()).unwrap();
        let err = decls.declare("network", "main", BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateResource {
                key: ResourceKey::new("network", "main")
            }
        );

        // Same name under a different type is a different resource.
        assert!(decls.declare("subnet", "main", BTreeMap::new()).is_ok());
        assert_eq!(decls.len(), 2);
    }

    #[test]
    fn test_resolve_references() {
        let mut decls = Declarations::new();
        decls.declare("network", "main", attrs(&[("cidr", "10.0.0.0/16")])).unwrap();
        decls
            .declare(
                "subnet",
                "public",
                attrs(&[("vpc_id", "${network.main.id}"), ("cidr", "10.0.1.0/24")]),
            )
            .unwrap();

        let edges = decls.resolve_references().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to_string(), "subnet.public.vpc_id -> network.main.id");
    }

    #[test]
    fn test_unknown_reference_names_consumer_and_target() {
        let mut decls = Declarations::new();
        decls
            .declare("subnet", "public", attrs(&[("vpc_id", "${network.missing.id}")]))
            .unwrap();

        match decls.resolve_references() {
            Err(GraphError::UnknownReference { from, attribute, target }) => {
                assert_eq!(from, ResourceKey::new("subnet", "public"));
                assert_eq!(attribute, "vpc_id");
                assert_eq!(target, ResourceKey::new("network", "missing"));
            }
            other => panic!("expected UnknownReference, got {other:?}"),
        }
    }
}
