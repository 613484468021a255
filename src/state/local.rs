//! Local file-based state storage backend.
//!
//! This module provides file-based state storage for local development and
//! single-machine use. Each record is its own JSON file under
//! `<base>/resources/`, written through a temporary file and a rename so a
//! reader never observes a partial record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{InfragraphError, Result, StateError};
use crate::model::ResourceKey;

use super::lock::{KeyLocks, LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::{RecordUpdate, StateStore};
use super::types::{StateRecord, StateSnapshot};

/// Default state directory.
pub const DEFAULT_STATE_DIR: &str = ".infragraph/state";

/// Directory holding one file per record.
const RESOURCES_DIR: &str = "resources";

/// Lock file name.
const LOCK_FILE: &str = "run.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Directory holding record files.
    resources_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Per-key serialization.
    key_locks: KeyLocks,
}

impl LocalStateStore {
    /// Creates a new local state store in the default directory under the
    /// current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                InfragraphError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(DEFAULT_STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let resources_dir = base_dir.join(RESOURCES_DIR);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            resources_dir,
            lock_path,
            key_locks: KeyLocks::new(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, key: &ResourceKey) -> PathBuf {
        self.resources_dir
            .join(format!("{}.{}.json", key.resource_type, key.name))
    }

    /// Ensures a directory exists.
    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                InfragraphError::State(StateError::storage(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads a record file.
    async fn read_record(path: &Path) -> Result<Option<StateRecord>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(InfragraphError::State(StateError::Corrupted {
                    message: format!("Failed to read {}: {e}", path.display()),
                }));
            }
        };

        let record = serde_json::from_str(&content).map_err(|e| {
            InfragraphError::State(StateError::Corrupted {
                message: format!("Failed to parse {}: {e}", path.display()),
            })
        })?;

        Ok(Some(record))
    }

    /// Writes a file atomically via a temporary file and rename.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent).await?;
        }

        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            InfragraphError::State(StateError::storage(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            InfragraphError::State(StateError::storage(format!("Failed to write state file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            InfragraphError::State(StateError::storage(format!("Failed to sync state file: {e}")))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            InfragraphError::State(StateError::storage(format!(
                "Failed to rename state file: {e}"
            )))
        })?;

        Ok(())
    }

    async fn write_record(&self, key: &ResourceKey, record: &StateRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record).map_err(|e| {
            InfragraphError::State(StateError::serialization(format!(
                "Failed to serialize record for {key}: {e}"
            )))
        })?;
        Self::write_atomic(&self.record_path(key), &content).await?;
        debug!("Saved record for {}", key);
        Ok(())
    }

    async fn remove_record(&self, key: &ResourceKey) -> Result<()> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => {
                debug!("Deleted record for {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InfragraphError::State(StateError::storage(format!(
                "Failed to delete record for {key}: {e}"
            )))),
        }
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            InfragraphError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            InfragraphError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                InfragraphError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let mut snapshot = StateSnapshot::new();

        let mut entries = match fs::read_dir(&self.resources_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State directory does not exist: {}", self.resources_dir.display());
                return Ok(snapshot);
            }
            Err(e) => {
                return Err(InfragraphError::State(StateError::storage(format!(
                    "Failed to list state directory: {e}"
                ))));
            }
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            InfragraphError::State(StateError::storage(format!(
                "Failed to list state directory: {e}"
            )))
        })? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if let Some(record) = Self::read_record(&path).await? {
                snapshot.insert(record.key.clone(), record);
            }
        }

        info!(
            "Loaded {} records from: {}",
            snapshot.len(),
            self.resources_dir.display()
        );
        Ok(snapshot)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<StateRecord>> {
        Self::read_record(&self.record_path(key)).await
    }

    async fn save(&self, key: &ResourceKey, record: &StateRecord) -> Result<()> {
        let _guard = self.key_locks.lock(key).await;
        self.write_record(key, record).await
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let _guard = self.key_locks.lock(key).await;
        self.remove_record(key).await
    }

    async fn update(&self, key: &ResourceKey, apply: RecordUpdate) -> Result<Option<StateRecord>> {
        let _guard = self.key_locks.lock(key).await;
        let current = Self::read_record(&self.record_path(key)).await?;
        let next = apply(current);

        match &next {
            Some(record) => self.write_record(key, record).await?,
            None => self.remove_record(key).await?,
        }
        Ok(next)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(InfragraphError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
            self.delete_lock_file().await?;
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

        Self::ensure_dir(&self.base_dir).await?;

        // create_new so two processes racing for the lock cannot both win.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
            .map_err(|e| {
                InfragraphError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                })
            })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            InfragraphError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            InfragraphError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
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
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
