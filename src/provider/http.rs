//! REST provider client.
//!
//! Talks to a provider exposing `POST/PUT/DELETE {endpoint}/resources/{type}[/{id}]`
//! and classifies every failure for the executor's retry policy.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use super::api::{ProviderApi, Provisioned};
use crate::error::{InfragraphError, ProviderError, ProviderResult, Result};
use crate::model::Attributes;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// REST provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    endpoint: String,
    /// Bearer token, if the provider requires one.
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    attributes: &'a Attributes,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
    #[serde(default)]
    outputs: Attributes,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    outputs: Attributes,
}

impl HttpProvider {
    /// Creates a client with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                InfragraphError::Provider(ProviderError::permanent(format!(
                    "Failed to create HTTP client: {e}"
                )))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.endpoint);
        trace!("{} {}", method, url);
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> ProviderResult<Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::transient(format!("Request timed out: {e}"))
            } else {
                ProviderError::transient(format!("Request failed: {e}"))
            }
        })
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> ProviderResult<T> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("Failed to parse response: {e}")))
    }
}

/// Maps a non-success response to a classified error.
async fn classify(response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {body}", status.as_u16())
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Transient {
            message,
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::unauthorized(message),
        s if s.is_server_error() => ProviderError::Transient {
            message,
            retry_after,
        },
        _ => ProviderError::permanent(message),
    }
}

#[async_trait]
impl ProviderApi for HttpProvider {
    async fn create_resource(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Provisioned> {
        let builder = self
            .request(Method::POST, &format!("/resources/{resource_type}"))
            .json(&ResourceRequest { attributes });
        let response = Self::send(builder).await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }

        let created: CreateResponse = Self::parse(response).await?;
        debug!("Provider created {} {}", resource_type, created.id);
        Ok(Provisioned {
            provider_id: created.id,
            outputs: created.outputs,
        })
    }

    async fn update_resource(
        &self,
        resource_type: &str,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        let builder = self
            .request(Method::PUT, &format!("/resources/{resource_type}/{provider_id}"))
            .json(&ResourceRequest { attributes });
        let response = Self::send(builder).await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }

        let updated: UpdateResponse = Self::parse(response).await?;
        Ok(updated.outputs)
    }

    async fn delete_resource(&self, resource_type: &str, provider_id: &str) -> ProviderResult<()> {
        let builder = self.request(
            Method::DELETE,
            &format!("/resources/{resource_type}/{provider_id}"),
        );
        let response = Self::send(builder).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!("{} {} already gone", resource_type, provider_id);
            return Ok(());
        }
        if !status.is_success() {
            return Err(classify(response).await);
        }
        Ok(())
    }
}
