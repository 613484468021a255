//! S3-based state storage backend.
//!
//! This module provides remote state storage using AWS S3 (or compatible
//! services) for shared use. Each record is its own object at
//! `<prefix>resources/<type>/<name>.json`; a single PUT replaces it
//! atomically.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{InfragraphError, Result, StateError};
use crate::model::ResourceKey;

use super::lock::{KeyLocks, LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::{RecordUpdate, StateStore};
use super::types::{StateRecord, StateSnapshot};

/// Key segment under which records live.
const RESOURCES_PREFIX: &str = "resources/";

/// Lock object key suffix.
const LOCK_KEY: &str = "run.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
    /// Per-key serialization.
    key_locks: KeyLocks,
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
            key_locks: KeyLocks::new(),
        }
    }

    /// Gets the full S3 key for a file.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    /// Gets the S3 key holding a record.
    fn record_key(&self, key: &ResourceKey) -> String {
        record_object_key(&self.prefix, key)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    InfragraphError::State(StateError::s3(format!(
                        "Failed to read S3 object: {e}"
                    )))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    InfragraphError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(InfragraphError::State(StateError::s3(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| InfragraphError::State(StateError::s3(format!("S3 put error: {e}"))))?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                InfragraphError::State(StateError::s3(format!("S3 delete error: {e}")))
            })?;

        Ok(())
    }

    /// Lists every record object key, following continuation tokens.
    async fn list_record_keys(&self) -> Result<Vec<String>> {
        let prefix = self.key(RESOURCES_PREFIX);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    InfragraphError::State(StateError::s3(format!("S3 list error: {e}")))
                })?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(".json"))
                    .map(str::to_string),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn read_record(&self, object_key: &str) -> Result<Option<StateRecord>> {
        let Some(content) = self.get_object(object_key).await? else {
            return Ok(None);
        };

        let record = serde_json::from_str(&content).map_err(|e| {
            InfragraphError::State(StateError::Corrupted {
                message: format!("Failed to parse {object_key}: {e}"),
            })
        })?;
        Ok(Some(record))
    }

    async fn write_record(&self, key: &ResourceKey, record: &StateRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record).map_err(|e| {
            InfragraphError::State(StateError::serialization(format!(
                "Failed to serialize record for {key}: {e}"
            )))
        })?;
        self.put_object(&self.record_key(key), &content).await?;
        debug!("Saved record for {} to s3://{}", key, self.bucket);
        Ok(())
    }
}

fn record_object_key(prefix: &str, key: &ResourceKey) -> String {
    format!(
        "{prefix}{RESOURCES_PREFIX}{}/{}.json",
        key.resource_type, key.name
    )
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let mut snapshot = StateSnapshot::new();

        for object_key in self.list_record_keys().await? {
            if let Some(record) = self.read_record(&object_key).await? {
                snapshot.insert(record.key.clone(), record);
            }
        }

        info!(
            "Loaded {} records from s3://{}/{}",
            snapshot.len(),
            self.bucket,
            self.prefix
        );
        Ok(snapshot)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<StateRecord>> {
        self.read_record(&self.record_key(key)).await
    }

    async fn save(&self, key: &ResourceKey, record: &StateRecord) -> Result<()> {
        let _guard = self.key_locks.lock(key).await;
        self.write_record(key, record).await
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let _guard = self.key_locks.lock(key).await;
        self.delete_object(&self.record_key(key)).await?;
        debug!("Deleted record for {}", key);
        Ok(())
    }

    async fn update(&self, key: &ResourceKey, apply: RecordUpdate) -> Result<Option<StateRecord>> {
        let _guard = self.key_locks.lock(key).await;
        let current = self.read_record(&self.record_key(key)).await?;
        let next = apply(current);

        match &next {
            Some(record) => self.write_record(key, record).await?,
            None => self.delete_object(&self.record_key(key)).await?,
        }
        Ok(next)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.get_lock_info().await? {
            if !existing.is_expired() {
                return Err(InfragraphError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);

        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            InfragraphError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        self.put_object(&self.key(LOCK_KEY), &content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.get_lock_info().await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }

        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(&self.key(LOCK_KEY)).await? else {
            return Ok(None);
        };

        let lock_info = serde_json::from_str(&content).map_err(|e| {
            InfragraphError::State(StateError::Corrupted {
                message: format!("Failed to parse lock: {e}"),
            })
        })?;
        Ok(Some(lock_info))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
