//! Registry mapping type names to capabilities.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::api::ProviderApi;
use super::resource_type::{GenericResourceType, ResourceType};
use crate::config::Manifest;
use crate::error::GraphError;
use crate::model::ResourceKey;

/// Resource type capabilities, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct ResourceTypeRegistry {
    types: BTreeMap<String, Arc<dyn ResourceType>>,
}

impl ResourceTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry with one [`GenericResourceType`] per entry in the
    /// manifest's `types` section, all backed by `api`.
    #[must_use]
    pub fn from_manifest(manifest: &Manifest, api: &Arc<dyn ProviderApi>) -> Self {
        let mut registry = Self::new();
        for (name, capabilities) in &manifest.types {
            registry.register(Arc::new(
                GenericResourceType::new(name.clone(), Arc::clone(api))
                    .with_in_place_update(capabilities.in_place_update)
                    .with_force_new(capabilities.force_new.iter().cloned()),
            ));
        }
        registry
    }

    /// Registers a capability under its type name, replacing any previous one.
    pub fn register(&mut self, resource_type: Arc<dyn ResourceType>) {
        debug!("Registered resource type {}", resource_type.type_name());
        self.types
            .insert(resource_type.type_name().to_string(), resource_type);
    }

    /// Gets the capability for a type name.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn ResourceType>> {
        self.types.get(resource_type)
    }

    /// Gets the capability for a resource's type.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownResourceType`] if nothing is registered.
    pub fn for_key(&self, key: &ResourceKey) -> Result<&Arc<dyn ResourceType>, GraphError> {
        self.get(&key.resource_type)
            .ok_or_else(|| GraphError::UnknownResourceType {
                key: key.clone(),
                resource_type: key.resource_type.clone(),
            })
    }

    /// Returns the registered type names.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }
}
