//! Core error types for `PhaseCurve`
//!
//! Configuration and validation error types shared across the workspace.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading, validation and compilation errors.
///
/// Every variant is fatal: an envelope is never built from a configuration
/// that produced one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML/JSON parsing failed
    #[error("parse error in {path}{}: {message}", line.map_or_else(String::new, |l| format!(" (line {l})")))]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(errors))]
    ValidationError {
        /// Path (or label) of the configuration that failed
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Required environment variable referenced with `${VAR:?message}` is unset
    #[error("environment variable '{var}' is not set: {message}")]
    EnvVarNotSet {
        /// Variable name
        var: String,
        /// Message given in the reference
        message: String,
    },

    /// A phase formula failed to compile
    #[error("formula error at {location}: {message}")]
    Formula {
        /// Location in the configuration (e.g., "phases[1].formula")
        location: String,
        /// Compiler message
        message: String,
    },

    /// One or more configuration files failed validation.
    #[error("{count} file(s) failed validation")]
    ValidationFailed {
        /// Number of files that failed validation.
        count: usize,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    match errors {
        [] => "no issues recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "phases[2].next")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Error - validation failure that prevents the envelope from being built
    Error,
    /// Warning - suspicious authoring that is still accepted
    Warning,
}
