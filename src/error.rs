//! Error types for the Skyform composition engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, execution, provider calls and state
//! management.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Skyform engine.
#[derive(Debug, Error)]
pub enum SkyformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Plan execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Provider backend errors raised outside of plan execution.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

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
    /// The declaration file was not found.
    #[error("Declaration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The declaration file could not be parsed.
    #[error("Failed to parse declarations: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Declaration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing or malformed.
    #[error("Invalid environment variable: {name}")]
    InvalidEnvVar {
        /// Name of the offending variable.
        name: String,
    },
}

/// Errors detected while building the dependency graph.
///
/// All of these are raised before any provider call, so reporting them has
/// no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two nodes were declared with the same id.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },

    /// An input references a node that was never declared.
    #[error("Resource '{consumer}' input '{input}' references missing resource '{producer}' (output '{output}')")]
    DanglingReference {
        /// Node holding the reference.
        consumer: String,
        /// Input name holding the reference.
        input: String,
        /// Referenced node id.
        producer: String,
        /// Referenced output name.
        output: String,
    },

    /// The reference edges form a cycle.
    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Node ids along the cycle, first id repeated at the end.
        cycle: Vec<String>,
    },
}

/// Errors raised while executing a plan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A reference was resolved before its producer completed.
    ///
    /// This is an internal invariant violation: a correct plan never
    /// schedules a consumer ahead of its producers.
    #[error("Unresolved reference in '{consumer}': {producer}.{output} is not available")]
    UnresolvedReference {
        /// Node whose inputs could not be resolved.
        consumer: String,
        /// Referenced node id.
        producer: String,
        /// Referenced output name.
        output: String,
    },

    /// A provider call failed; the remaining plan was halted.
    #[error("Failed to {verb} '{node_id}': {source}")]
    ActionFailed {
        /// Node whose action failed.
        node_id: String,
        /// Verb of the failed action.
        verb: String,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// An action completed but its record could not be saved; the
    /// remaining plan was halted.
    #[error("State not saved after '{node_id}': {message}")]
    StateNotSaved {
        /// Node whose completed action is not durable.
        node_id: String,
        /// Underlying store error.
        message: String,
    },

    /// The state lock could not be renewed while actions were running.
    #[error("State lock lost during execution: {message}")]
    LockLost {
        /// Underlying store error.
        message: String,
    },
}

/// Failure reported by a provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Resource kind the call was made for.
    pub kind: String,
    /// Short description of the failure.
    pub message: String,
    /// Raw diagnostic from the backend (stderr, response body...).
    pub diagnostic: Option<String>,
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

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The lock this run held expired and was claimed by someone else.
    #[error("State lock {lock_id} is no longer held by this run")]
    LockLost {
        /// Lock id this run was issued.
        lock_id: String,
    },

    /// The recorded state changed between approval and execution.
    #[error("State changed since the plan was approved: {message}")]
    StalePlan {
        /// What differs.
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

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for Skyform operations.
pub type Result<T> = std::result::Result<T, SkyformError>;

impl SkyformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the process exit status for this error.
    ///
    /// Every error maps to a non-zero status; graph, provider and internal
    /// failures get distinct codes so scripts can tell them apart.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Graph(_) => 3,
            Self::Provider(_) | Self::Execution(ExecutionError::ActionFailed { .. }) => 4,
            Self::State(_)
            | Self::Execution(
                ExecutionError::StateNotSaved { .. } | ExecutionError::LockLost { .. },
            ) => 5,
            Self::Execution(ExecutionError::UnresolvedReference { .. }) => 70,
            Self::Io(_) | Self::Internal(_) => 1,
        }
    }

    /// Returns true if re-running `apply` may succeed without changing the
    /// declarations.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::Execution(ExecutionError::ActionFailed { .. })
                | Self::State(StateError::LockedByOther { .. } | StateError::LockFailed { .. })
        )
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

    /// Creates a parse error pointing at a location in the declarations.
    #[must_use]
    pub fn parse_at(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: Some(location.into()),
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

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a provider error for a resource kind.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            diagnostic: None,
        }
    }

    /// Attaches the backend's raw diagnostic output.
    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_full_path() {
        let err = GraphError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_exit_codes_are_non_zero_and_distinct() {
        let graph: SkyformError = GraphError::DuplicateId { id: "x".into() }.into();
        let provider: SkyformError = ExecutionError::ActionFailed {
            node_id: "x".into(),
            verb: "create".into(),
            source: ProviderError::new("storage.bucket", "boom"),
        }
        .into();
        let internal: SkyformError = ExecutionError::UnresolvedReference {
            consumer: "cdn".into(),
            producer: "bucket".into(),
            output: "arn".into(),
        }
        .into();

        assert_eq!(graph.exit_code(), 3);
        assert_eq!(provider.exit_code(), 4);
        assert_eq!(internal.exit_code(), 70);
        assert!(provider.is_resumable());
        assert!(!graph.is_resumable());
    }

    #[test]
    fn test_unsaved_state_and_lost_lock_are_state_failures() {
        let unsaved: SkyformError = ExecutionError::StateNotSaved {
            node_id: "cdn".into(),
            message: "disk full".into(),
        }
        .into();
        let lost: SkyformError = StateError::LockLost { lock_id: "l-1".into() }.into();

        assert_eq!(unsaved.exit_code(), 5);
        assert_eq!(lost.exit_code(), 5);
        assert!(!unsaved.is_resumable());
        assert!(!lost.is_resumable());
    }
}
