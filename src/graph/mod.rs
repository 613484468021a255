//! Dependency graph construction.
//!
//! Turns [`crate::model::Declarations`] into a validated, acyclic
//! [`ResourceGraph`] with a reproducible topological order.

mod builder;
mod types;

pub use builder::GraphBuilder;
pub(crate) use builder::reachable;
pub use types::ResourceGraph;
