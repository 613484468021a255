//! Attribute previews for change planning.
//!
//! Before apply, the outputs of resources that are about to be created or
//! replaced are unknown. A preview evaluates a node with those outputs
//! rendered as [`KNOWN_AFTER_APPLY`] so the planner can still report which
//! attributes change.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::model::{Attributes, OutputRef, ResourceKey, ResourceNode};
use crate::provider::AttributeChange;
use crate::state::{StateRecord, StateSnapshot};

/// Placeholder for values only the provider can supply.
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// Evaluates `node` against recorded outputs.
///
/// References to anything in `pending`, or to outputs missing from the
/// record, render as [`KNOWN_AFTER_APPLY`].
#[must_use]
pub fn preview_attributes(
    node: &ResourceNode,
    records: &StateSnapshot,
    pending: &BTreeSet<ResourceKey>,
) -> Attributes {
    let lookup = |reference: &OutputRef| {
        let known = if pending.contains(&reference.target) {
            None
        } else {
            records
                .get(&reference.target)
                .and_then(|record| record.output(&reference.attribute))
                .cloned()
        };
        Some(known.unwrap_or_else(|| Value::String(String::from(KNOWN_AFTER_APPLY))))
    };

    // The lookup above is total, so evaluation cannot fail.
    node.evaluate(lookup).unwrap_or_default()
}

/// Lists every attribute of `record` as removed.
#[must_use]
pub fn removal_changes(record: &StateRecord) -> Vec<AttributeChange> {
    record
        .attributes
        .iter()
        .map(|(name, value)| AttributeChange {
            attribute: name.clone(),
            old: Some(value.clone()),
            new: None,
        })
        .collect()
}

/// Lists every attribute of a preview as added.
#[must_use]
pub fn addition_changes(preview: &Attributes) -> Vec<AttributeChange> {
    preview
        .iter()
        .map(|(name, value)| AttributeChange {
            attribute: name.clone(),
            old: None,
            new: Some(value.clone()),
        })
        .collect()
}

/// Renders a value for plan output.
#[must_use]
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None => String::from("(none)"),
        Some(Value::String(s)) if s == KNOWN_AFTER_APPLY => s.clone(),
        Some(other) => other.to_string(),
    }
}
