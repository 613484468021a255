//! Planning module for reconciliation runs.
//!
//! This module compares the resource graph against recorded state and
//! produces an ordered [`ChangePlan`] of creates, updates, deletes and no-ops.

mod diff;
mod engine;
mod plan;

pub use diff::{KNOWN_AFTER_APPLY, render_value};
pub use engine::Planner;
pub use plan::{ActionKind, ChangeAction, ChangePlan, PlanSummary};
