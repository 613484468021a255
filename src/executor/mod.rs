//! Plan execution.
//!
//! Runs the actions of a [`crate::planner::ChangePlan`] concurrently in
//! dependency order, retrying transient provider failures and recording
//! every applied resource in the state store.

mod report;
mod retry;
mod scheduler;

pub use report::{ActionOutcome, ActionReport, ApplyResult, FailureKind};
pub use retry::{Attempted, RetryConfig, retry_call};
pub use scheduler::{Executor, ExecutorConfig};
