//! State types for tracking applied resources.
//!
//! A [`StateRecord`] is the persisted snapshot of one resource as last
//! applied: the provider identity, the attribute values sent, the outputs
//! received, and the hash of the declaration that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Attributes, ResourceKey};

/// Current version of the record format.
pub const STATE_VERSION: &str = "1";

/// Every record in a store, keyed by resource.
pub type StateSnapshot = BTreeMap<ResourceKey, StateRecord>;

/// Persisted snapshot of one applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Record format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Resource identity.
    pub key: ResourceKey,
    /// Provider-assigned identity.
    pub provider_id: String,
    /// Attribute values last sent to the provider.
    pub attributes: Attributes,
    /// Outputs last reported by the provider.
    pub outputs: Attributes,
    /// Hash of the declaration that produced this record.
    pub declaration_hash: String,
    /// Resources this one referenced when applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceKey>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last applied.
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Creates a record for a freshly created resource.
    #[must_use]
    pub fn new(
        key: ResourceKey,
        provider_id: impl Into<String>,
        attributes: Attributes,
        outputs: Attributes,
        declaration_hash: impl Into<String>,
        dependencies: Vec<ResourceKey>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: default_version(),
            key,
            provider_id: provider_id.into(),
            attributes,
            outputs,
            declaration_hash: declaration_hash.into(),
            dependencies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `self` rewritten after an apply, keeping `created_at` from
    /// `previous` when the provider identity did not change.
    #[must_use]
    pub fn superseding(mut self, previous: Option<&Self>) -> Self {
        if let Some(previous) = previous.filter(|p| p.provider_id == self.provider_id) {
            self.created_at = previous.created_at;
        }
        self
    }

    /// Returns the output named `attribute`.
    #[must_use]
    pub fn output(&self, attribute: &str) -> Option<&serde_json::Value> {
        self.outputs.get(attribute)
    }
}

fn default_version() -> String {
    String::from(STATE_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(provider_id: &str) -> StateRecord {
        let mut outputs = Attributes::new();
        outputs.insert(String::from("id"), json!(provider_id));
        StateRecord::new(
            ResourceKey::new("network", "main"),
            provider_id,
            Attributes::new(),
            outputs,
            "abc123",
            vec![],
        )
    }

    #[test]
    fn test_superseding_keeps_created_at_for_same_identity() {
        let first = record("vpc-1");
        std::thread::sleep(std::time::Duration::from_millis(5));

        let updated = record("vpc-1").superseding(Some(&first));
        assert_eq!(updated.created_at, first.created_at);
        assert!(updated.updated_at > first.updated_at);

        let replaced = record("vpc-2").superseding(Some(&first));
        assert!(replaced.created_at > first.created_at);
    }

    #[test]
    fn test_record_serialization() {
        let original = record("vpc-1");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: StateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.output("id"), Some(&json!("vpc-1")));
    }
}
