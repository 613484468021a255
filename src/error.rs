//! Error types for the infragraph reconciliation engine.
//!
//! This module provides the error hierarchy for every phase of a run:
//! manifest loading, graph validation, planning, state management, provider
//! calls, and reconciliation.
//!
//! Graph-level errors ([`GraphError`]) are always fatal and surface before any
//! remote mutation. Provider errors ([`ProviderError`]) are node-scoped and
//! classified so the executor can decide whether to retry.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::ResourceKey;

/// The main error type for the infragraph engine.
#[derive(Debug, Error)]
pub enum InfragraphError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph validation errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest file could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// An attribute value contains a malformed interpolation.
    #[error("Invalid expression in {resource}.{attribute}: {message}")]
    InvalidExpression {
        /// Resource declaring the attribute.
        resource: String,
        /// Attribute holding the expression.
        attribute: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Resource graph validation errors.
///
/// These are raised while declaring resources and building the dependency
/// graph. They are never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A resource with the same type and name is already declared.
    #[error("Duplicate resource: {key}")]
    DuplicateResource {
        /// The duplicated identity.
        key: ResourceKey,
    },

    /// An attribute references a resource that is not declared.
    #[error("{from}.{attribute} references undeclared resource {target}")]
    UnknownReference {
        /// Resource holding the reference.
        from: ResourceKey,
        /// Attribute holding the reference.
        attribute: String,
        /// The missing resource.
        target: ResourceKey,
    },

    /// The references between resources form a cycle.
    #[error("Cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// The cycle path; the first node is repeated at the end.
        cycle: Vec<ResourceKey>,
    },

    /// No capability implementation is registered for a resource type.
    #[error("Unknown resource type '{resource_type}' for {key}")]
    UnknownResourceType {
        /// Resource using the type.
        key: ResourceKey,
        /// The unregistered type name.
        resource_type: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// No record exists for the requested key.
    #[error("No state record for {key}")]
    RecordNotFound {
        /// The missing key.
        key: ResourceKey,
    },
}

/// Classified provider API failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Rate limiting, timeouts, and other failures worth retrying.
    #[error("transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Provider-suggested delay before the next attempt.
        retry_after: Option<Duration>,
    },

    /// Validation and other failures that will not succeed on retry.
    #[error("permanent provider failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },

    /// Credentials were rejected.
    #[error("provider rejected credentials: {message}")]
    Unauthorized {
        /// Description of the failure.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The actions of a plan could not be ordered.
    #[error("Failed to resolve dependencies: {message}")]
    DependencyResolutionFailed {
        /// Description of the dependency issue.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Some actions did not reach Applied or NoOp.
    #[error("Apply incomplete: {failed} failed, {skipped} skipped")]
    ApplyIncomplete {
        /// Number of failed actions.
        failed: usize,
        /// Number of skipped actions.
        skipped: usize,
    },
}

/// Result type alias for infragraph operations.
pub type Result<T> = std::result::Result<T, InfragraphError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

fn format_cycle(cycle: &[ResourceKey]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl InfragraphError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is raised by graph or manifest validation,
    /// before any side effect could have happened.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Graph(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a transient error carrying a retry-after hint.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates the transient error reported when a call exceeds its deadline.
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self::transient(format!("call timed out after {}ms", limit.as_millis()))
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the provider-suggested retry delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
