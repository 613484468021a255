//! Manifest validation.
//!
//! This module checks a manifest for values the engine cannot work with
//! before any declaration is built, collecting every error and warning
//! rather than stopping at the first.

use crate::error::{ConfigError, InfragraphError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    EngineSettings, Manifest, ProjectConfig, ProviderConfig, ProviderKind, ResourceDeclaration,
    StateBackend, StateConfig,
};

/// Upper bound for `settings.concurrency`.
const MAX_CONCURRENCY: usize = 64;

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if let Some(first_error) = result.errors.first() {
            Err(InfragraphError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        } else {
            debug!("Manifest validation passed");
            Ok(result)
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&manifest.project, &mut result);
        Self::validate_settings(&manifest.settings, &mut result);
        Self::validate_state(&manifest.state, &mut result);
        Self::validate_provider(&manifest.provider, &mut result);
        Self::validate_resources(manifest, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.push_error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.push_error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must start with a lowercase letter and contain only lowercase alphanumerics, '-' or '_'.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.push_error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_settings(settings: &EngineSettings, result: &mut ValidationResult) {
        if settings.concurrency == 0 || settings.concurrency > MAX_CONCURRENCY {
            result.push_error(
                "settings.concurrency",
                format!("Concurrency must be between 1 and {MAX_CONCURRENCY}"),
            );
        }

        if settings.max_attempts == 0 {
            result.push_error("settings.max_attempts", "At least one attempt is required");
        }

        if settings.backoff_multiplier < 1.0 {
            result.push_error(
                "settings.backoff_multiplier",
                "Backoff multiplier must be at least 1.0",
            );
        }

        if settings.initial_backoff_ms > settings.max_backoff_ms {
            result.warnings.push(String::from(
                "settings.initial_backoff_ms exceeds max_backoff_ms; every retry waits max_backoff_ms",
            ));
        }

        if settings.action_timeout_secs == 0 {
            result.push_error(
                "settings.action_timeout_secs",
                "Action timeout must be at least one second",
            );
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_deref().is_none_or(str::is_empty) {
                    result.push_error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        match provider.kind {
            ProviderKind::Http => match provider.endpoint.as_deref() {
                None | Some("") => {
                    result.push_error(
                        "provider.endpoint",
                        "An endpoint is required when using the http provider",
                    );
                }
                Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                    result.push_error(
                        "provider.endpoint",
                        format!("Endpoint '{endpoint}' must be an http(s) URL"),
                    );
                }
                Some(_) => {}
            },
            ProviderKind::Local => {}
        }

        if provider.timeout_secs == Some(0) {
            result.push_error("provider.timeout_secs", "Timeout must be at least one second");
        }
    }

    fn validate_resources(manifest: &Manifest, result: &mut ValidationResult) {
        if manifest.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared; apply will destroy everything in state"));
            return;
        }

        let mut used_types = HashSet::new();

        for (i, resource) in manifest.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");
            Self::validate_resource(resource, &prefix, result);

            if !manifest.types.contains_key(&resource.resource_type) {
                result.push_error(
                    format!("{prefix}.type"),
                    format!(
                        "Resource type '{}' is not declared under 'types'",
                        resource.resource_type
                    ),
                );
            }
            used_types.insert(resource.resource_type.as_str());
        }

        for (name, capabilities) in &manifest.types {
            if !used_types.contains(name.as_str()) {
                result
                    .warnings
                    .push(format!("types.{name}: declared but no resource uses it"));
            }
            if !capabilities.in_place_update && !capabilities.force_new.is_empty() {
                result.warnings.push(format!(
                    "types.{name}.force_new has no effect: every change already replaces"
                ));
            }
        }
    }

    fn validate_resource(resource: &ResourceDeclaration, prefix: &str, result: &mut ValidationResult) {
        if !is_valid_name(&resource.resource_type) {
            result.push_error(
                format!("{prefix}.type"),
                format!("Resource type '{}' is not a valid identifier", resource.resource_type),
            );
        }

        if !is_valid_name(&resource.name) {
            result.push_error(
                format!("{prefix}.name"),
                format!("Resource name '{}' is not a valid identifier", resource.name),
            );
        }

        if resource.attributes.contains_key("id") {
            result.warnings.push(format!(
                "{prefix}.attributes.id: 'id' is assigned by the provider and will be shadowed in outputs"
            ));
        }
    }
}

impl ValidationResult {
    fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Identifiers start with a lowercase letter, then `[a-z0-9_-]`.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn manifest(yaml: &str) -> Manifest {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("cache_cluster"));
        assert!(is_valid_name("game-server-1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1st"));
        assert!(!is_valid_name("Network"));
        assert!(!is_valid_name("a.b"));
    }

    #[test]
    fn test_valid_manifest() {
        let m = manifest(
            r"
project:
  name: arena
types:
  network: {}
resources:
  - type: network
    name: main
",
        );
        let result = ConfigValidator::new().validate(&m).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_undeclared_type_is_an_error() {
        let m = manifest(
            r"
project:
  name: arena
resources:
  - type: network
    name: main
",
        );
        let result = ConfigValidator::new().check(&m);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "resources[0].type");
        assert!(ConfigValidator::new().validate(&m).is_err());
    }

    #[test]
    fn test_backend_requirements() {
        let m = manifest(
            r"
project:
  name: arena
settings:
  concurrency: 0
state:
  backend: s3
provider:
  kind: http
",
        );
        let fields: Vec<String> = ConfigValidator::new()
            .check(&m)
            .errors
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert!(fields.contains(&String::from("settings.concurrency")));
        assert!(fields.contains(&String::from("state.bucket")));
        assert!(fields.contains(&String::from("provider.endpoint")));
    }

    #[test]
    fn test_warnings() {
        let m = manifest(
            r"
project:
  name: arena
types:
  network:
    in_place_update: false
    force_new: [cidr]
  unused: {}
resources:
  - type: network
    name: main
",
        );
        let result = ConfigValidator::new().validate(&m).unwrap();
        assert_eq!(result.warnings.len(), 2);
    }
}
