//! File-backed simulated provider.
//!
//! Each resource is a JSON document at `<root>/<id>.json`. Useful for local
//! runs of a manifest without a real provider behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::api::{ProviderApi, Provisioned};
use crate::error::{ProviderError, ProviderResult};
use crate::model::Attributes;

/// Default directory for simulated resources.
pub const DEFAULT_LOCAL_PROVIDER_DIR: &str = ".infragraph/provider";

/// Simulated provider storing resources on disk.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct SimulatedResource {
    id: String,
    resource_type: String,
    attributes: Attributes,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LocalProvider {
    /// Creates a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("Using local provider at: {}", root.display());
        Self { root }
    }

    fn resource_path(&self, provider_id: &str) -> PathBuf {
        self.root.join(format!("{provider_id}.json"))
    }

    async fn write(&self, resource: &SimulatedResource) -> ProviderResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, &e))?;
        let path = self.resource_path(&resource.id);
        let content = serde_json::to_string_pretty(resource)
            .map_err(|e| ProviderError::permanent(format!("Failed to serialize resource: {e}")))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(&path, &e))
    }

    async fn read(&self, provider_id: &str) -> ProviderResult<SimulatedResource> {
        let path = self.resource_path(provider_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::permanent(format!(
                    "Resource {provider_id} does not exist"
                )));
            }
            Err(e) => return Err(io_error(&path, &e)),
        };
        serde_json::from_str(&content)
            .map_err(|e| ProviderError::permanent(format!("Corrupted resource {provider_id}: {e}")))
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> ProviderError {
    ProviderError::transient(format!("{}: {error}", path.display()))
}

#[async_trait]
impl ProviderApi for LocalProvider {
    async fn create_resource(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Provisioned> {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{resource_type}-{}", &uuid[..8]);
        let now = Utc::now();

        self.write(&SimulatedResource {
            id: id.clone(),
            resource_type: resource_type.to_string(),
            attributes: attributes.clone(),
            created_at: now,
            updated_at: now,
        })
        .await?;

        debug!("Simulated create of {}", id);
        Ok(Provisioned {
            provider_id: id,
            outputs: Attributes::new(),
        })
    }

    async fn update_resource(
        &self,
        resource_type: &str,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        let mut resource = self.read(provider_id).await?;
        if resource.resource_type != resource_type {
            return Err(ProviderError::permanent(format!(
                "Resource {provider_id} is a {}, not a {resource_type}",
                resource.resource_type
            )));
        }

        resource.attributes.clone_from(attributes);
        resource.updated_at = Utc::now();
        self.write(&resource).await?;

        debug!("Simulated update of {}", provider_id);
        Ok(Attributes::new())
    }

    async fn delete_resource(&self, _resource_type: &str, provider_id: &str) -> ProviderResult<()> {
        let path = self.resource_path(provider_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Simulated delete of {}", provider_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());

        let mut attributes = Attributes::new();
        attributes.insert(String::from("engine"), json!("redis"));

        let provisioned = provider
            .create_resource("cache_cluster", &attributes)
            .await
            .unwrap();
        assert!(provisioned.provider_id.starts_with("cache_cluster-"));
        assert!(dir.path().join(format!("{}.json", provisioned.provider_id)).exists());

        attributes.insert(String::from("nodes"), json!(3));
        provider
            .update_resource("cache_cluster", &provisioned.provider_id, &attributes)
            .await
            .unwrap();
        let stored = provider.read(&provisioned.provider_id).await.unwrap();
        assert_eq!(stored.attributes["nodes"], json!(3));

        provider
            .delete_resource("cache_cluster", &provisioned.provider_id)
            .await
            .unwrap();
        // Deleting twice is fine.
        tokio_test::assert_ok!(
            provider
                .delete_resource("cache_cluster", &provisioned.provider_id)
                .await
        );
    }

    #[tokio::test]
    async fn test_update_of_missing_resource_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        let err = provider
            .update_resource("network", "network-deadbeef", &Attributes::new())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
