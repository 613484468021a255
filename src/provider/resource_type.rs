//! Per-type capability interface.
//!
//! The engine never branches on a type name; everything type-specific goes
//! through a [`ResourceType`] looked up in the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::api::{ProviderApi, Provisioned};
use crate::error::ProviderResult;
use crate::model::Attributes;

/// A changed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Previously applied value, if any.
    pub old: Option<Value>,
    /// Desired value, if any.
    pub new: Option<Value>,
}

/// The outcome of comparing applied and desired attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDiff {
    /// Changed attributes, sorted by name.
    pub changes: Vec<AttributeChange>,
    /// True if the changes cannot be applied in place.
    pub requires_replacement: bool,
}

/// Capabilities of one resource type.
#[async_trait]
pub trait ResourceType: Send + Sync + fmt::Debug {
    /// Name this capability is registered under.
    fn type_name(&self) -> &str;

    /// Whether an existing resource can be updated without replacement.
    fn supports_in_place_update(&self) -> bool;

    /// Creates the resource.
    async fn create(&self, attributes: &Attributes) -> ProviderResult<Provisioned>;

    /// Updates the resource in place and returns its outputs.
    async fn update(&self, provider_id: &str, attributes: &Attributes) -> ProviderResult<Attributes>;

    /// Deletes the resource.
    async fn delete(&self, provider_id: &str) -> ProviderResult<()>;

    /// Compares applied and desired attributes.
    fn diff_attributes(&self, old: &Attributes, new: &Attributes) -> AttributeDiff {
        let changes = diff_values(old, new);
        AttributeDiff {
            requires_replacement: !self.supports_in_place_update() && !changes.is_empty(),
            changes,
        }
    }
}

/// Lists attributes whose values differ between `old` and `new`.
#[must_use]
pub fn diff_values(old: &Attributes, new: &Attributes) -> Vec<AttributeChange> {
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let before = old.get(name);
            let after = new.get(name);
            (before != after).then(|| AttributeChange {
                attribute: name.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect()
}

/// A resource type backed by any [`ProviderApi`].
///
/// Outputs are the desired attributes overlaid with whatever the provider
/// reports, and always carry `id`.
pub struct GenericResourceType {
    name: String,
    in_place_update: bool,
    force_new: BTreeSet<String>,
    api: Arc<dyn ProviderApi>,
}

impl GenericResourceType {
    /// Creates a type that updates in place and has no replacement-forcing
    /// attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, api: Arc<dyn ProviderApi>) -> Self {
        Self {
            name: name.into(),
            in_place_update: true,
            force_new: BTreeSet::new(),
            api,
        }
    }

    /// Sets whether in-place update is supported.
    #[must_use]
    pub const fn with_in_place_update(mut self, supported: bool) -> Self {
        self.in_place_update = supported;
        self
    }

    /// Sets the attributes whose change forces a replacement.
    #[must_use]
    pub fn with_force_new<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_new = attributes.into_iter().map(Into::into).collect();
        self
    }

    fn outputs(attributes: &Attributes, reported: Attributes, provider_id: &str) -> Attributes {
        let mut outputs = attributes.clone();
        outputs.extend(reported);
        outputs.insert(String::from("id"), Value::String(provider_id.to_string()));
        outputs
    }
}

impl fmt::Debug for GenericResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericResourceType")
            .field("name", &self.name)
            .field("in_place_update", &self.in_place_update)
            .field("force_new", &self.force_new)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceType for GenericResourceType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn supports_in_place_update(&self) -> bool {
        self.in_place_update
    }

    async fn create(&self, attributes: &Attributes) -> ProviderResult<Provisioned> {
        debug!("Creating {} resource", self.name);
        let provisioned = self.api.create_resource(&self.name, attributes).await?;
        let outputs = Self::outputs(attributes, provisioned.outputs, &provisioned.provider_id);
        Ok(Provisioned {
            provider_id: provisioned.provider_id,
            outputs,
        })
    }

    async fn update(&self, provider_id: &str, attributes: &Attributes) -> ProviderResult<Attributes> {
        debug!("Updating {} resource {}", self.name, provider_id);
        let reported = self
            .api
            .update_resource(&self.name, provider_id, attributes)
            .await?;
        Ok(Self::outputs(attributes, reported, provider_id))
    }

    async fn delete(&self, provider_id: &str) -> ProviderResult<()> {
        debug!("Deleting {} resource {}", self.name, provider_id);
        self.api.delete_resource(&self.name, provider_id).await
    }

    fn diff_attributes(&self, old: &Attributes, new: &Attributes) -> AttributeDiff {
        let changes = diff_values(old, new);
        let requires_replacement = !changes.is_empty()
            && (!self.in_place_update
                || changes.iter().any(|c| self.force_new.contains(&c.attribute)));
        AttributeDiff {
            changes,
            requires_replacement,
        }
    }
}
