// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # infragraph
//!
//! A dependency-ordered reconciliation engine for declared infrastructure
//! resources.
//!
//! ## Overview
//!
//! Resources are declared in `infragraph.yaml`. Attribute values may refer to
//! outputs of other resources with `${type.name.output}`, and those references
//! are the graph's edges. The engine:
//!
//! - Validates the graph and rejects cycles before touching anything remote
//! - Diffs each declaration against the recorded state
//! - Plans create, update, replace and delete actions in dependency order
//! - Applies them concurrently, retrying transient provider failures
//!
//! ## Architecture
//!
//! 1. **Declarations**: parsed from the manifest into [`model::ResourceNode`]s
//! 2. **Graph**: [`graph::GraphBuilder`] orders them and detects cycles
//! 3. **Planner**: [`planner::Planner`] produces an ordered [`planner::ChangePlan`]
//! 4. **Executor**: [`executor::Executor`] runs the plan and records outcomes
//! 5. **State**: [`state::StateStore`] keeps one record per applied resource
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing and validation
//! - [`model`]: Resource keys, attribute expressions and declarations
//! - [`graph`]: Dependency graph construction
//! - [`provider`]: Provider API clients and resource type capabilities
//! - [`state`]: State storage backends (memory, local, S3)
//! - [`planner`]: Diff computation and change planning
//! - [`executor`]: Bounded-concurrency plan execution with retries
//! - [`reconciler`]: Plan and apply under the run lock
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: arena
//!   environment: dev
//!
//! types:
//!   network: {}
//!   server:
//!     force_new: [image]
//!
//! resources:
//!   - type: network
//!     name: main
//!     attributes:
//!       cidr: 10.0.0.0/16
//!   - type: server
//!     name: web
//!     attributes:
//!       image: web:1.4
//!       network_id: ${network.main.id}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod model;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeclarationHasher, Manifest};
pub use error::{InfragraphError, Result};
pub use executor::{ApplyResult, Executor, ExecutorConfig, RetryConfig};
pub use graph::{GraphBuilder, ResourceGraph};
pub use model::{Declarations, ResourceKey, ResourceNode};
pub use planner::{ActionKind, ChangePlan, Planner};
pub use provider::{ProviderApi, ResourceType, ResourceTypeRegistry};
pub use reconciler::Reconciler;
pub use state::{LocalStateStore, MemoryStateStore, S3StateStore, StateRecord, StateStore};
