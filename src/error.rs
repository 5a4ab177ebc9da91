//! Error types for the converge engine.
//!
//! This module provides the error hierarchy for every stage of an operation:
//! spec parsing and graph validation, planning, runtime calls, execution,
//! state management, and engine configuration.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Spec document or resource graph errors.
    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Runtime (backend) errors.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// One or more steps failed while applying a change order.
    #[error("Apply error: {0}")]
    Apply(#[from] AggregateApplyError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Engine configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Spec document and resource graph errors.
#[derive(Debug, Error)]
pub enum SpecError {
    /// The spec file was not found.
    #[error("Spec file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The spec document could not be parsed.
    #[error("Failed to parse spec: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Two resources share the same ID.
    #[error("Duplicate resource ID: {id}")]
    DuplicateId {
        /// The duplicated ID.
        id: String,
    },

    /// A `dependsOn` entry does not name a resource in the spec.
    #[error("Resource {id} depends on unknown resource {dependency}")]
    UnresolvedDependency {
        /// Resource declaring the edge.
        id: String,
        /// The missing target.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The action for a resource could not be determined.
    #[error("Cannot determine action for {id}: {reason}")]
    Undefined {
        /// Resource ID.
        id: String,
        /// Why the lookup failed.
        reason: String,
    },
}

/// Errors reported by a backend runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime does not implement this capability.
    #[error("{operation} is not supported by the {runtime} runtime")]
    Unsupported {
        /// Runtime type name.
        runtime: String,
        /// Operation name.
        operation: String,
    },

    /// No runtime is registered for the resource type.
    #[error("No runtime registered for resource type '{resource_type}'")]
    UnknownType {
        /// The unregistered type.
        resource_type: String,
    },

    /// The resource does not exist in the backend.
    #[error("Resource not found: {id}")]
    NotFound {
        /// Resource ID.
        id: String,
    },

    /// The backend call failed.
    #[error("{operation} {id} failed: {message}")]
    OperationFailed {
        /// Operation name.
        operation: String,
        /// Resource ID.
        id: String,
        /// Description of the failure.
        message: String,
    },
}

/// A single failed step inside an [`AggregateApplyError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Resource ID of the failed step.
    pub id: String,
    /// Cause reported on the step's terminal message.
    pub cause: String,
}

/// Returned when one or more steps of a change order end in `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} resource(s) failed: {}", .failures.len(), format_failures(.failures))]
pub struct AggregateApplyError {
    /// Every failed step, in change order.
    pub failures: Vec<StepFailure>,
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

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Engine configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override holds an unusable value.
    #[error("Invalid value for {name}: {value}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Result type alias for converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

fn format_failures(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.id, f.cause))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
                | Self::Apply(_)
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::State(StateError::LockFailed { .. }) => Some(2),
            Self::State(StateError::LockedByOther { .. }) => Some(30),
            Self::Apply(_) => Some(5),
            _ => None,
        }
    }
}

impl SpecError {
    /// Creates a parse error with an optional source location.
    #[must_use]
    pub fn parse(message: impl Into<String>, location: Option<String>) -> Self {
        Self::Parse {
            message: message.into(),
            location,
        }
    }
}

impl RuntimeError {
    /// Creates an operation failure.
    #[must_use]
    pub fn failed(
        operation: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported-capability error.
    #[must_use]
    pub fn unsupported(runtime: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            runtime: runtime.into(),
            operation: operation.into(),
        }
    }
}

impl AggregateApplyError {
    /// Returns the IDs of every failed resource.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }

    /// Returns the cause recorded for a resource, if it failed.
    #[must_use]
    pub fn cause_of(&self, id: &str) -> Option<&str> {
        self.failures
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.cause.as_str())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = AggregateApplyError {
            failures: vec![
                StepFailure {
                    id: String::from("r1"),
                    cause: String::from("boom"),
                },
                StepFailure {
                    id: String::from("r2"),
                    cause: String::from("dependency failed"),
                },
            ],
        };

        assert_eq!(err.failed_ids(), vec!["r1", "r2"]);
        assert_eq!(err.cause_of("r1"), Some("boom"));
        assert_eq!(err.cause_of("r3"), None);

        let rendered = err.to_string();
        assert!(rendered.starts_with("2 resource(s) failed"));
        assert!(rendered.contains("r2 (dependency failed)"));
    }

    #[test]
    fn test_retryable() {
        let locked = ConvergeError::State(StateError::LockFailed {
            message: String::from("busy"),
        });
        assert!(locked.is_retryable());
        assert_eq!(locked.retry_delay_secs(), Some(2));

        let parse = ConvergeError::Spec(SpecError::parse("bad", None));
        assert!(!parse.is_retryable());
        assert_eq!(parse.retry_delay_secs(), None);
    }
}
