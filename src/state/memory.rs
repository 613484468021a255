//! In-process state storage backend.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::lock::{KeyLocks, LockInfo, generate_holder_id};
use super::store::{RecordUpdate, StateStore};
use super::types::{StateRecord, StateSnapshot};
use crate::error::{InfragraphError, Result, StateError};
use crate::model::ResourceKey;

/// State store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<StateSnapshot>,
    run_lock: Mutex<Option<LockInfo>>,
    key_locks: KeyLocks,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = StateRecord>) -> Self {
        let store = Self::new();
        store
            .records()
            .extend(records.into_iter().map(|r| (r.key.clone(), r)));
        store
    }

    fn records(&self) -> MutexGuard<'_, StateSnapshot> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_lock(&self) -> MutexGuard<'_, Option<LockInfo>> {
        self.run_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.records().clone())
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<StateRecord>> {
        Ok(self.records().get(key).cloned())
    }

    async fn save(&self, key: &ResourceKey, record: &StateRecord) -> Result<()> {
        let _guard = self.key_locks.lock(key).await;
        self.records().insert(key.clone(), record.clone());
        debug!("Saved record for {}", key);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let _guard = self.key_locks.lock(key).await;
        self.records().remove(key);
        debug!("Deleted record for {}", key);
        Ok(())
    }

    async fn update(&self, key: &ResourceKey, apply: RecordUpdate) -> Result<Option<StateRecord>> {
        let _guard = self.key_locks.lock(key).await;
        let current = self.records().get(key).cloned();
        let next = apply(current);

        let mut records = self.records();
        match &next {
            Some(record) => {
                records.insert(key.clone(), record.clone());
            }
            None => {
                records.remove(key);
            }
        }
        Ok(next)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut run_lock = self.run_lock();
        if let Some(existing) = run_lock.as_ref().filter(|l| !l.is_expired()) {
            return Err(InfragraphError::State(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }));
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::new(&holder_id);
        *run_lock = Some(lock_info.clone());

        info!("Acquired state lock: {}", lock_info.lock_id);
        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut run_lock = self.run_lock();
        if run_lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *run_lock = None;
            info!("Released state lock: {lock_id}");
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.run_lock().clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;
    use serde_json::json;
    use std::sync::Arc;

    fn record(key: &ResourceKey, count: i64) -> StateRecord {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("count"), json!(count));
        StateRecord::new(key.clone(), "id-1", attributes, Attributes::new(), "h", vec![])
    }

    #[tokio::test]
    async fn test_save_is_visible_to_next_load() {
        let store = MemoryStateStore::new();
        let key = ResourceKey::new("network", "main");
        store.save(&key, &record(&key, 0)).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&key));

        store.delete(&key).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStateStore::new());
        let key = ResourceKey::new("cache", "counter");
        store.save(&key, &record(&key, 0)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.spawn(async move {
                store
                    .update(
                        &key,
                        Box::new(|current: Option<StateRecord>| {
                            current.map(|mut r| {
                                let n = r.attributes["count"].as_i64().unwrap_or(0);
                                r.attributes.insert(String::from("count"), json!(n + 1));
                                r
                            })
                        }),
                    )
                    .await
                    .unwrap();
            });
        }
        while tasks.join_next().await.is_some() {}

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.attributes["count"], json!(32));
    }

    #[tokio::test]
    async fn test_run_lock() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("first").await.unwrap();
        assert!(store.acquire_lock("second").await.is_err());
        assert!(store.is_locked().await.unwrap());

        store.release_lock("someone-else").await.unwrap();
        assert!(store.is_locked().await.unwrap());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
    }
}
