//! Configuration module for Skyform stacks.
//!
//! This module handles all declaration-file functionality:
//! - Parsing and deserializing `skyform.stack.yaml`
//! - Validation of names and backend settings
//! - Computing declaration hashes for state and history

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, apply_overrides, find_config_file};
pub use spec::{
    ExecutionConfig, ProviderConfig, ProviderType, ResourceSpec, StackConfig, StackFile,
    StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
