//! Configuration validation.
//!
//! This module validates engine configurations and stack keys before any
//! state is touched.

use crate::error::{ConfigError, Result};
use crate::state::StackKey;
use std::collections::HashSet;
use tracing::debug;

use super::types::{EngineConfig, StateBackend, StateConfig};

/// Concurrency above which a warning is emitted.
const HIGH_CONCURRENCY: usize = 256;

/// Validator for engine configurations.
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

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found; warnings are returned in the result.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into());
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_execution(config, &mut result);
        Self::validate_ordered_kinds(&config.ordered_kinds, &mut result);
        Self::validate_ignored_fields(&config.ignored_fields, &mut result);
        Self::validate_state(&config.state, &mut result);

        result
    }

    /// Validates that a stack key can be used as a storage path.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid segment.
    pub fn validate_stack_key(&self, key: &StackKey) -> Result<()> {
        let fields = ["tenant", "project", "stack"];
        for (field, segment) in fields.iter().zip(key.segments()) {
            if !is_valid_segment(segment) {
                return Err(ConfigError::validation(
                    format!(
                        "Stack {field} '{segment}' is invalid. Must be non-empty alphanumeric with '-', '_' or '.'."
                    ),
                    format!("stack.{field}"),
                )
                .into());
            }
        }
        Ok(())
    }

    fn validate_execution(config: &EngineConfig, result: &mut ValidationResult) {
        if config.concurrency == 0 {
            result.errors.push(ValidationError {
                field: String::from("concurrency"),
                message: String::from("Concurrency must be at least 1"),
            });
        } else if config.concurrency > HIGH_CONCURRENCY {
            result.warnings.push(format!(
                "Concurrency {} is unusually high; runtimes may throttle",
                config.concurrency
            ));
        }

        if config.dry_run {
            result
                .warnings
                .push(String::from("Dry run enabled: state will not be saved"));
        }
    }

    fn validate_ordered_kinds(kinds: &[String], result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, kind) in kinds.iter().enumerate() {
            if kind.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("ordered_kinds[{i}]"),
                    message: String::from("Kind cannot be empty"),
                });
            } else if !seen.insert(kind.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("ordered_kinds[{i}]"),
                    message: format!("Kind '{kind}' is listed more than once"),
                });
            }
        }
    }

    fn validate_ignored_fields(fields: &[String], result: &mut ValidationResult) {
        for (i, path) in fields.iter().enumerate() {
            if path.split('.').any(str::is_empty) {
                result.errors.push(ValidationError {
                    field: format!("ignored_fields[{i}]"),
                    message: format!("Field path '{path}' has an empty segment"),
                });
            }
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
                if state.path.is_some() {
                    result
                        .warnings
                        .push(String::from("state.path is ignored by the s3 backend"));
                }
            }
            StateBackend::Local => {
                if state.path.as_ref().is_some_and(|p| p.trim().is_empty()) {
                    result.errors.push(ValidationError {
                        field: String::from("state.path"),
                        message: String::from("State path cannot be empty"),
                    });
                }
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
            StateBackend::Memory => {
                result
                    .warnings
                    .push(String::from("Memory state backend: state is lost on exit"));
            }
        }
    }
}

/// A path segment must be non-empty, ASCII alphanumeric with `-`, `_` or `.`,
/// and must not be `.` or `..`.
fn is_valid_segment(segment: &str) -> bool {
    if segment.is_empty() || segment == "." || segment == ".." {
        return false;
    }

    segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
