//! Resource identities, nodes, and dependency edges.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::expr::{Expression, OutputRef, ResolveError};

/// Resolved attribute values, keyed by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Identity of a declared resource: its type plus a logical name.
///
/// Displayed and parsed as `type.name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Resource type (e.g. `network`, `cache_cluster`).
    pub resource_type: String,
    /// Logical name, unique per type.
    pub name: String,
}

impl ResourceKey {
    /// Creates a new resource key.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((resource_type, name))
                if !resource_type.is_empty() && !name.is_empty() && !name.contains('.') =>
            {
                Ok(Self::new(resource_type, name))
            }
            _ => Err(format!("'{s}' is not a resource key of the form type.name")),
        }
    }
}

/// A declared infrastructure object and its attribute expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Identity of the resource.
    pub key: ResourceKey,
    /// Attribute name to expression.
    pub attributes: BTreeMap<String, Expression>,
}

impl ResourceNode {
    /// Creates a new node.
    #[must_use]
    pub fn new(key: ResourceKey, attributes: BTreeMap<String, Expression>) -> Self {
        Self { key, attributes }
    }

    /// Returns every output reference made by this node, paired with the
    /// attribute that holds it.
    #[must_use]
    pub fn references(&self) -> Vec<(&str, &OutputRef)> {
        self.attributes
            .iter()
            .flat_map(|(name, expr)| {
                expr.references()
                    .into_iter()
                    .map(move |reference| (name.as_str(), reference))
            })
            .collect()
    }

    /// Returns the set of resources this node depends on.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceKey> {
        self.references()
            .into_iter()
            .map(|(_, reference)| reference.target.clone())
            .collect()
    }

    /// Evaluates every attribute into its desired value.
    ///
    /// # Errors
    ///
    /// Returns an error if `lookup` cannot supply a referenced output.
    pub fn evaluate<F>(&self, lookup: F) -> Result<Attributes, ResolveError>
    where
        F: Fn(&OutputRef) -> Option<serde_json::Value>,
    {
        self.attributes
            .iter()
            .map(|(name, expr)| expr.evaluate(&lookup).map(|value| (name.clone(), value)))
            .collect()
    }
}

/// A dependency edge from a consuming attribute to a producing node's output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Reference {
    /// Consuming resource.
    pub from: ResourceKey,
    /// Attribute of the consuming resource holding the reference.
    pub attribute: String,
    /// Producing resource.
    pub to: ResourceKey,
    /// Output attribute of the producing resource.
    pub output: String,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}.{}", self.from, self.attribute, self.to, self.output)
    }
}
