//! The external provider API the engine drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::model::Attributes;

/// Result of creating a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioned {
    /// Provider-assigned identity.
    pub provider_id: String,
    /// Output attributes reported by the provider.
    #[serde(default)]
    pub outputs: Attributes,
}

/// Remote provider operations.
///
/// Every failure is classified as a [`crate::error::ProviderError`] so the
/// executor knows whether retrying can help.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Creates a resource of the given type.
    async fn create_resource(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Provisioned>;

    /// Updates a resource in place, returning its new outputs.
    async fn update_resource(
        &self,
        resource_type: &str,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes>;

    /// Deletes a resource.
    async fn delete_resource(&self, resource_type: &str, provider_id: &str) -> ProviderResult<()>;
}
