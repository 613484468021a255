//! Manifest parser for loading declarations and their settings.
//!
//! This module handles loading the manifest from YAML files and environment
//! variables, with proper precedence and error handling, and turns the raw
//! resource list into typed [`Declarations`].

use crate::error::{ConfigError, InfragraphError, Result};
use crate::model::{Declarations, Expression};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::Manifest;

/// Environment variable holding the provider bearer token.
pub const PROVIDER_TOKEN_VAR: &str = "INFRAGRAPH_PROVIDER_TOKEN";

/// Parser for loading infragraph manifests.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(InfragraphError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            InfragraphError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            InfragraphError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed manifest for project {} with {} resources",
            manifest.project.name,
            manifest.resources.len()
        );
        Ok(manifest)
    }

    /// Loads a manifest with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `INFRAGRAPH_<SECTION>_<KEY>` (e.g., `INFRAGRAPH_STATE_BUCKET`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        Self::apply_env_overrides(&mut manifest);
        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut Manifest) {
        if let Ok(name) = std::env::var("INFRAGRAPH_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            manifest.project.name = name;
        }

        if let Ok(env) = std::env::var("INFRAGRAPH_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            manifest.project.environment = env;
        }

        if let Ok(path) = std::env::var("INFRAGRAPH_STATE_PATH") {
            debug!("Overriding state.path from environment");
            manifest.state.path = Some(path);
        }

        if let Ok(bucket) = std::env::var("INFRAGRAPH_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            manifest.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("INFRAGRAPH_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            manifest.state.prefix = Some(prefix);
        }

        if let Ok(endpoint) = std::env::var("INFRAGRAPH_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            manifest.provider.endpoint = Some(endpoint);
        }

        if let Ok(value) = std::env::var("INFRAGRAPH_CONCURRENCY") {
            match value.parse() {
                Ok(concurrency) => {
                    debug!("Overriding settings.concurrency from environment");
                    manifest.settings.concurrency = concurrency;
                }
                Err(_) => warn!("Ignoring INFRAGRAPH_CONCURRENCY={}: not a number", value),
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                InfragraphError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider bearer token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_provider_token() -> Result<String> {
        std::env::var(PROVIDER_TOKEN_VAR).map_err(|_| {
            InfragraphError::Config(ConfigError::MissingEnvVar {
                name: String::from(PROVIDER_TOKEN_VAR),
            })
        })
    }
}

/// Turns the manifest's resource list into typed declarations.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidExpression`] for a malformed interpolation
/// and a graph error for a duplicate `(type, name)`.
pub fn build_declarations(manifest: &Manifest) -> Result<Declarations> {
    let mut declarations = Declarations::new();

    for resource in &manifest.resources {
        let mut attributes = BTreeMap::new();
        for (attribute, raw) in &resource.attributes {
            let expression = Expression::parse(raw).map_err(|e| ConfigError::InvalidExpression {
                resource: format!("{}.{}", resource.resource_type, resource.name),
                attribute: attribute.clone(),
                message: e.message,
            })?;
            attributes.insert(attribute.clone(), expression);
        }
        declarations.declare(&resource.resource_type, &resource.name, attributes)?;
    }

    Ok(declarations)
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["infragraph.yaml", "infragraph.yml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(InfragraphError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    const STACK: &str = r#"
project:
  name: arena
  environment: prod

settings:
  concurrency: 8

resources:
  - type: network
    name: main
    attributes:
      cidr: 10.0.0.0/16
  - type: subnet
    name: public
    attributes:
      vpc_id: "${network.main.id}"
      cidr: 10.0.1.0/24
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ConfigParser::new().parse_yaml(STACK, None).unwrap();
        assert_eq!(manifest.project.name, "arena");
        assert_eq!(manifest.settings.concurrency, 8);
        assert_eq!(manifest.settings.max_attempts, 4);
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.resources[1].resource_type, "subnet");
    }

    #[test]
    fn test_build_declarations() {
        let manifest = ConfigParser::new().parse_yaml(STACK, None).unwrap();
        let declarations = build_declarations(&manifest).unwrap();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations.resolve_references().unwrap().len(), 1);
    }

    #[test]
    fn test_build_declarations_rejects_bad_interpolation() {
        let yaml = r#"
project:
  name: arena
resources:
  - type: subnet
    name: public
    attributes:
      vpc_id: "${network.main"
"#;
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let err = build_declarations(&manifest).unwrap_err();
        assert!(matches!(
            err,
            InfragraphError::Config(ConfigError::InvalidExpression { ref attribute, .. })
                if attribute == "vpc_id"
        ));
    }

    #[test]
    fn test_build_declarations_rejects_duplicates() {
        let yaml = r"
project:
  name: arena
resources:
  - type: network
    name: main
  - type: network
    name: main
";
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let err = build_declarations(&manifest).unwrap_err();
        assert!(matches!(
            err,
            InfragraphError::Graph(GraphError::DuplicateResource { .. })
        ));
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("infragraph.yaml"), STACK).unwrap();
        let nested = dir.path().join("envs/prod");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("infragraph.yaml"));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigParser::new().load_file("/nonexistent/infragraph.yaml").unwrap_err();
        assert!(matches!(err, InfragraphError::Config(ConfigError::FileNotFound { .. })));
    }
}
