//! Declaration file types.
//!
//! This module defines the structs that map to `skyform.stack.yaml`. They
//! are converted into a [`DeclarationSet`] before planning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::error::{ConfigError, Result};
use crate::graph::{DeclarationSet, InputValue, RemovalPolicy, ResourceNode};
use crate::planner::DEFAULT_PARALLELISM;

/// The root structure of a stack declaration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct StackFile {
    /// Stack identity.
    pub stack: StackConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider backend configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Execution settings.
    #[serde(default)]
    #[validate(nested)]
    pub execution: ExecutionConfig,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// Stack identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Stack name.
    pub name: String,
    /// Environment (e.g., "dev", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region, AWS default chain if unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
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
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Backend type.
    #[serde(rename = "type", default)]
    pub provider_type: ProviderType,
    /// Provider program (for command provider).
    #[serde(default)]
    pub program: Option<String>,
    /// Extra arguments passed before the verb.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Provider backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// In-process simulated provider.
    #[default]
    Simulated,
    /// External provider program.
    Command,
}

/// Execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ExecutionConfig {
    /// Maximum number of concurrent actions.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 64))]
    pub parallelism: usize,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Node id, unique within the stack.
    pub id: String,
    /// Resource kind understood by the provider.
    pub kind: String,
    /// What to do when the resource is no longer declared.
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    /// Inputs; strings may contain `${node.output}` placeholders.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Outputs other resources may reference.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

impl StackFile {
    /// Converts the file into a declaration set.
    ///
    /// # Errors
    ///
    /// Returns a parse error if an input placeholder is malformed.
    pub fn to_declarations(&self) -> Result<DeclarationSet> {
        let mut declarations = DeclarationSet::new(self.stack.name.as_str());
        for (idx, spec) in self.resources.iter().enumerate() {
            let node = spec
                .to_node()
                .map_err(|msg| ConfigError::parse_at(msg, format!("resources[{idx}] ({})", spec.id)))?;
            declarations.declare(node);
        }
        Ok(declarations)
    }

    /// Returns resource ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }
}

impl ResourceSpec {
    /// Converts the resource entry into a graph node.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending input.
    pub fn to_node(&self) -> std::result::Result<ResourceNode, String> {
        let mut node =
            ResourceNode::new(self.id.as_str(), self.kind.as_str()).with_removal_policy(self.removal_policy);
        for (name, value) in &self.inputs {
            let value = InputValue::from_json(value.clone())
                .map_err(|e| format!("input '{name}': {e}"))?;
            node = node.with_input(name.as_str(), value);
        }
        for output in &self.outputs {
            node = node.with_output(output.as_str());
        }
        Ok(node)
    }
}
