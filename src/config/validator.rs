//! Declaration validation.
//!
//! Checks naming rules and backend settings before any graph is built.
//! Graph-level problems (duplicate ids, dangling references, cycles) are
//! left to the dependency graph, which reports them with full paths.

use crate::error::{ConfigError, Result, SkyformError};
use std::collections::HashMap;
use tracing::debug;
use validator::Validate;

use super::spec::{ProviderType, ResourceSpec, StackFile, StateBackend};

/// Validator for stack declaration files.
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

    /// Validates a declaration file.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, stack: &StackFile) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_stack(stack, &mut result);
        Self::validate_backends(stack, &mut result);
        Self::validate_resources(&stack.resources, &mut result);

        if let Err(errors) = stack.validate() {
            result.errors.push(ValidationError {
                field: String::from("execution"),
                message: errors.to_string(),
            });
        }

        if result.errors.is_empty() {
            debug!(
                "Declaration validation passed with {} warning(s)",
                result.warnings.len()
            );
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(SkyformError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    fn validate_stack(stack: &StackFile, result: &mut ValidationResult) {
        if !is_valid_name(&stack.stack.name) {
            result.error(
                "stack.name",
                format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with '-' or '_', starting with a letter.",
                    stack.stack.name
                ),
            );
        }

        if stack.stack.environment.is_empty() {
            result.error("stack.environment", "Environment cannot be empty");
        }

        if stack.resources.is_empty() {
            result.warnings.push(String::from("No resources declared"));
        }
    }

    fn validate_backends(stack: &StackFile, result: &mut ValidationResult) {
        if stack.state.backend == StateBackend::S3
            && stack.state.bucket.as_deref().is_none_or(str::is_empty)
        {
            result.error(
                "state.bucket",
                "S3 bucket name is required when using S3 backend",
            );
        }

        if stack.provider.provider_type == ProviderType::Command
            && stack.provider.program.as_deref().is_none_or(str::is_empty)
        {
            result.error(
                "provider.program",
                "A provider program is required when using the command provider",
            );
        }
    }

    fn validate_resources(resources: &[ResourceSpec], result: &mut ValidationResult) {
        let declared: HashMap<&str, &ResourceSpec> =
            resources.iter().map(|r| (r.id.as_str(), r)).collect();

        for (idx, resource) in resources.iter().enumerate() {
            let field = format!("resources[{idx}]");

            if !is_valid_name(&resource.id) {
                result.error(
                    format!("{field}.id"),
                    format!("Resource id '{}' is invalid", resource.id),
                );
            }

            if !is_valid_kind(&resource.kind) {
                result.error(
                    format!("{field}.kind"),
                    format!("Resource kind '{}' is invalid", resource.kind),
                );
            }

            for output in &resource.outputs {
                if !is_valid_output(output) {
                    result.error(
                        format!("{field}.outputs"),
                        format!("Output name '{output}' is invalid"),
                    );
                }
            }

            // malformed placeholders surface later as parse errors
            let Ok(node) = resource.to_node() else {
                continue;
            };
            for (input, reference) in node.references() {
                let Some(producer) = declared.get(reference.node_id.as_str()) else {
                    continue;
                };
                if !producer.outputs.iter().any(|o| *o == reference.output) {
                    result.warnings.push(format!(
                        "{}.{input} references '{reference}', but '{}' does not declare output '{}'",
                        resource.id, producer.id, reference.output
                    ));
                }
            }
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with `-` or `_`, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !name.ends_with('-')
}

/// Kinds are dotted lowercase paths, e.g. `cdn.distribution`.
fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.split('.').all(is_valid_name)
}

fn is_valid_output(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
