//! Configuration module for the infragraph engine.
//!
//! This module handles all manifest-related functionality:
//! - Parsing and deserializing `infragraph.yaml`
//! - Validation of manifest values
//! - Building typed declarations from the resource list
//! - Computing declaration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::DeclarationHasher;
pub use parser::{ConfigParser, PROVIDER_TOKEN_VAR, build_declarations, find_config_file};
pub use spec::{
    EngineSettings, Manifest, ProjectConfig, ProviderConfig, ProviderKind, ResourceDeclaration,
    ResourceTypeConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
