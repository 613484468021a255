//! State management module for the infragraph engine.
//!
//! This module provides persistent storage of [`StateRecord`]s, the baseline
//! the planner diffs against, plus the run lock that keeps two applies from
//! racing on one store.

mod local;
mod lock;
mod memory;
mod s3;
mod store;
mod types;

pub use local::{DEFAULT_STATE_DIR, LocalStateStore};
pub use lock::{KeyLocks, LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use store::{RecordUpdate, StateStore};
pub use types::{STATE_VERSION, StateRecord, StateSnapshot};
