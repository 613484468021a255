//! Typed attribute expressions.
//!
//! Attribute values are parsed once, when declarations are loaded, into an
//! expression tree. References to other resources' outputs become explicit
//! [`OutputRef`] nodes so the graph builder can see every edge; nothing is
//! substituted into strings until the executor evaluates the tree in
//! dependency order.
//!
//! Interpolation syntax inside strings is `${type.name.attribute}`; `$${`
//! produces a literal `${`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::node::ResourceKey;

/// An attribute expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// A fixed value.
    Literal(Value),
    /// The output attribute of another resource, value type preserved.
    Reference(OutputRef),
    /// String concatenation of the rendered parts.
    Concat(Vec<Expression>),
    /// A list containing at least one reference.
    List(Vec<Expression>),
    /// A mapping containing at least one reference.
    Map(BTreeMap<String, Expression>),
}

/// Reference to an output attribute of a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Producing resource.
    pub target: ResourceKey,
    /// Output attribute name.
    pub attribute: String,
}

/// A malformed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionError {
    /// What is wrong with the expression.
    pub message: String,
}

/// A reference whose output was not available at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    /// The unresolved reference.
    pub reference: OutputRef,
}

impl OutputRef {
    /// Creates a new output reference.
    #[must_use]
    pub fn new(target: ResourceKey, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// Parses the inside of an interpolation: `type.name.attribute`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input has exactly three non-empty segments.
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let segments: Vec<&str> = input.split('.').map(str::trim).collect();
        match segments.as_slice() {
            [resource_type, name, attribute]
                if !resource_type.is_empty() && !name.is_empty() && !attribute.is_empty() =>
            {
                Ok(Self::new(ResourceKey::new(*resource_type, *name), *attribute))
            }
            _ => Err(ExpressionError::new(format!(
                "reference '{input}' must have the form type.name.attribute"
            ))),
        }
    }
}

impl Expression {
    /// Parses a raw attribute value into an expression tree.
    ///
    /// Lists and mappings without any reference collapse into a single literal.
    ///
    /// # Errors
    ///
    /// Returns an error if any string contains a malformed interpolation.
    pub fn parse(value: &Value) -> Result<Self, ExpressionError> {
        match value {
            Value::String(s) => Self::parse_template(s),
            Value::Array(items) => {
                let parsed = items
                    .iter()
                    .map(Self::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.iter().all(|e| e.as_literal().is_some()) {
                    Ok(Self::Literal(Value::Array(
                        parsed.into_iter().filter_map(Self::into_literal).collect(),
                    )))
                } else {
                    Ok(Self::List(parsed))
                }
            }
            Value::Object(entries) => {
                let parsed = entries
                    .iter()
                    .map(|(k, v)| Self::parse(v).map(|e| (k.clone(), e)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                if parsed.values().all(|e| e.as_literal().is_some()) {
                    Ok(Self::Literal(Value::Object(
                        parsed
                            .into_iter()
                            .filter_map(|(k, e)| e.into_literal().map(|v| (k, v)))
                            .collect(),
                    )))
                } else {
                    Ok(Self::Map(parsed))
                }
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// Parses a string that may contain `${type.name.attribute}` interpolations.
    ///
    /// # Errors
    ///
    /// Returns an error on an unclosed or malformed interpolation.
    pub fn parse_template(input: &str) -> Result<Self, ExpressionError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("$${") {
                literal.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after.find('}').ok_or_else(|| {
                    ExpressionError::new(format!("unclosed interpolation in '{input}'"))
                })?;
                let reference = OutputRef::parse(&after[..end])?;
                if !literal.is_empty() {
                    parts.push(Self::Literal(Value::String(std::mem::take(&mut literal))));
                }
                parts.push(Self::Reference(reference));
                rest = &after[end + 1..];
            } else {
                literal.push('$');
                rest = &tail[1..];
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Self::Literal(Value::String(literal)));
        }

        match parts.len() {
            0 => Ok(Self::Literal(Value::String(String::new()))),
            1 => Ok(parts.swap_remove(0)),
            _ => Ok(Self::Concat(parts)),
        }
    }

    /// Returns the literal value if this expression has no references.
    #[must_use]
    pub const fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    fn into_literal(self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Collects every output reference in this expression, depth first.
    #[must_use]
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(reference) => found.push(reference),
            Self::Concat(parts) | Self::List(parts) => {
                for part in parts {
                    part.collect_references(found);
                }
            }
            Self::Map(entries) => {
                for entry in entries.values() {
                    entry.collect_references(found);
                }
            }
        }
    }

    /// Evaluates the expression, looking referenced outputs up with `lookup`.
    ///
    /// Concatenation renders strings verbatim, `null` as nothing, and any
    /// other value as its JSON text.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` cannot supply.
    pub fn evaluate<F>(&self, lookup: &F) -> Result<Value, ResolveError>
    where
        F: Fn(&OutputRef) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Reference(reference) => lookup(reference).ok_or_else(|| ResolveError {
                reference: reference.clone(),
            }),
            Self::Concat(parts) => {
                let mut rendered = String::new();
                for part in parts {
                    match part.evaluate(lookup)? {
                        Value::String(s) => rendered.push_str(&s),
                        Value::Null => {}
                        other => rendered.push_str(&other.to_string()),
                    }
                }
                Ok(Value::String(rendered))
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.evaluate(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.evaluate(lookup).map(|value| (k.clone(), value)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
        }
    }
}

impl ExpressionError {
    /// Creates a new expression error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "output '{}' of {} is not available",
            self.reference.attribute, self.reference.target
        )
    }
}

impl std::error::Error for ExpressionError {}
impl std::error::Error for ResolveError {}
