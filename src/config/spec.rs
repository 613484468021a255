//! Manifest types.
//!
//! This module defines the structs that map to the `infragraph.yaml` file.
//! A manifest names the project, tunes the engine, selects the state and
//! provider backends, declares the capabilities of each resource type, and
//! lists the resources themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Engine tuning.
    #[serde(default)]
    pub settings: EngineSettings,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider backend configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Capabilities per resource type.
    #[serde(default)]
    pub types: BTreeMap<String, ResourceTypeConfig>,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Engine tuning: concurrency, retry policy and per-action timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Maximum number of actions in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum attempts per action, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Deadline for a single provider call, in seconds.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProviderConfig {
    /// Provider kind.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the REST provider (required for http).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Directory for simulated resources (for local).
    #[serde(default)]
    pub path: Option<String>,
    /// HTTP request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Provider backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// File-backed simulated provider.
    #[default]
    Local,
    /// REST provider.
    Http,
}

/// Capabilities of a resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceTypeConfig {
    /// Whether the provider can update this type without replacing it.
    #[serde(default = "default_true")]
    pub in_place_update: bool,
    /// Attributes whose change forces a replacement.
    #[serde(default)]
    pub force_new: Vec<String>,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDeclaration {
    /// Resource type name.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Logical name, unique per type.
    pub name: String,
    /// Raw attribute values; strings may contain `${type.name.attr}`.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

impl Default for ResourceTypeConfig {
    fn default() -> Self {
        Self {
            in_place_update: true,
            force_new: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Returns the per-action timeout.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl Manifest {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }
}

// Default value functions

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_action_timeout_secs() -> u64 {
    600
}

const fn default_true() -> bool {
    true
}

fn default_environment() -> String {
    String::from("dev")
}
