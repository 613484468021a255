//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Records are stored one per key so a single record can be rewritten
//! atomically; per-key operations are serialized through
//! [`super::KeyLocks`], never through a store-wide lock.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{StateRecord, StateSnapshot};
use crate::error::Result;
use crate::model::ResourceKey;

/// A read-modify-write step for [`StateStore::update`].
///
/// Receives the current record (if any) and returns the record to store, or
/// `None` to remove it.
pub type RecordUpdate = Box<dyn FnOnce(Option<StateRecord>) -> Option<StateRecord> + Send>;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads every record.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Loads a single record.
    async fn get(&self, key: &ResourceKey) -> Result<Option<StateRecord>>;

    /// Stores a record. Visible to the next `load` by this process.
    async fn save(&self, key: &ResourceKey, record: &StateRecord) -> Result<()>;

    /// Removes a record. Removing a missing record is not an error.
    async fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// Atomically reads, transforms, and writes back one record.
    ///
    /// Returns the record as stored afterwards.
    async fn update(&self, key: &ResourceKey, apply: RecordUpdate) -> Result<Option<StateRecord>>;

    /// Acquires the run lock.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the run lock is held and unexpired.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
