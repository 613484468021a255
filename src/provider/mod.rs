//! Provider integration.
//!
//! This module contains:
//! - The [`ProviderApi`] collaborator interface and its REST and local backends
//! - The [`ResourceType`] capability interface and a generic implementation
//! - The registry mapping type names to capabilities

mod api;
mod http;
mod local;
mod registry;
mod resource_type;

#[cfg(test)]
pub(crate) use api::MockProviderApi;
pub use api::{ProviderApi, Provisioned};
pub use http::HttpProvider;
pub use local::{DEFAULT_LOCAL_PROVIDER_DIR, LocalProvider};
pub use registry::ResourceTypeRegistry;
pub use resource_type::{
    AttributeChange, AttributeDiff, GenericResourceType, ResourceType, diff_values,
};
