//! Error types for `PhaseCurve`
//!
//! This module provides the error hierarchy for formula compilation and
//! evaluation, the envelope state machine, batch simulation, and the
//! command-line exit codes they map to.

use thiserror::Error;

pub use phasecurve_core::error::{ConfigError, Severity, ValidationIssue};

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `PhaseCurve` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure, bad formula)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Formula evaluation failed at runtime
    pub const EVALUATION_ERROR: i32 = 4;

    /// Simulation did not terminate or was misconfigured
    pub const SIMULATION_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `PhaseCurve` operations.
///
/// Aggregates the domain errors and maps each to an exit code.
#[derive(Debug, Error)]
pub enum PhaseCurveError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Formula compile or evaluation error outside an envelope
    #[error(transparent)]
    Formula(#[from] FormulaError),

    /// Envelope state machine error
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Batch simulation error
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// Invalid command-line usage not caught by the argument parser
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PhaseCurveError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Formula(_) | Self::Envelope(EnvelopeError::Evaluation { .. }) => {
                ExitCode::EVALUATION_ERROR
            }
            Self::Envelope(_) => ExitCode::ERROR,
            Self::Simulation(_) => ExitCode::SIMULATION_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Formula Errors
// ============================================================================

/// Formula compilation and evaluation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Malformed formula text
    #[error("syntax error at offset {position}: {message}")]
    Syntax {
        /// Byte offset into the formula text
        position: usize,
        /// What the parser expected or found
        message: String,
    },

    /// Identifier is neither the parameter nor a declared variable
    #[error("unknown identifier '{name}'{}", did_you_mean(suggestion.as_deref()))]
    UnknownIdentifier {
        /// Identifier as written
        name: String,
        /// Closest known identifier
        suggestion: Option<String>,
    },

    /// Call to a function the evaluator does not provide
    #[error("unknown function '{name}'{}", did_you_mean(suggestion.as_deref()))]
    UnknownFunction {
        /// Function name as written
        name: String,
        /// Closest built-in function
        suggestion: Option<String>,
    },

    /// Function called with the wrong number of arguments
    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        /// Canonical function name
        function: &'static str,
        /// Accepted argument count, e.g. "2" or "1 or 2"
        expected: &'static str,
        /// Number of arguments supplied
        found: usize,
    },

    /// Parameter or variable name collides with a built-in function
    #[error("'{name}' is a built-in function name and cannot be bound")]
    ReservedName {
        /// The colliding name
        name: String,
    },

    /// Name is already bound as the parameter or another variable
    #[error("'{name}' is already bound")]
    DuplicateName {
        /// The repeated name
        name: String,
    },

    /// Parameter or variable name is not a valid identifier
    #[error("'{name}' is not a valid identifier")]
    InvalidName {
        /// The rejected name
        name: String,
    },

    /// Division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Argument outside a function's domain
    #[error("{function} is undefined for {argument}")]
    Domain {
        /// Canonical function name
        function: &'static str,
        /// Offending argument
        argument: f64,
    },

    /// Evaluation produced NaN or infinity
    #[error("formula produced a non-finite result ({value})")]
    NonFinite {
        /// The non-finite result
        value: f64,
    },

    /// Attempted to set a variable that was never declared
    #[error("unknown variable '{name}'")]
    UnknownVariable {
        /// Variable name
        name: String,
    },
}

fn did_you_mean(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

// ============================================================================
// Envelope Errors
// ============================================================================

/// Phase envelope state machine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    /// `activate` called while the envelope is running
    #[error("envelope is already active in phase '{phase}'")]
    AlreadyActive {
        /// Phase the envelope is currently in
        phase: String,
    },

    /// Envelope built without phases
    #[error("an envelope needs at least one phase")]
    NoPhases,

    /// Operation requires an active envelope
    #[error("envelope is not active")]
    NotActive,

    /// Referenced phase does not exist
    #[error("unknown phase '{name}'")]
    UnknownPhase {
        /// Requested phase name or index
        name: String,
    },

    /// Tick length was negative or not finite
    #[error("invalid tick length {dt}: must be finite and non-negative")]
    InvalidStep {
        /// Rejected tick length
        dt: f64,
    },

    /// Phase formula failed to evaluate; state is unchanged
    #[error("formula evaluation failed in phase '{phase}': {source}")]
    Evaluation {
        /// Phase whose formula failed
        phase: String,
        /// Underlying formula error
        #[source]
        source: FormulaError,
    },

    /// Zero-length phases formed a cycle
    #[error("transition cascade from phase '{phase}' exceeded {limit} steps")]
    CascadeLimit {
        /// Phase where the cascade started
        phase: String,
        /// Maximum number of chained transitions
        limit: usize,
    },
}

// ============================================================================
// Simulation Errors
// ============================================================================

/// Batch simulation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    /// The envelope never returned to idle within the tick budget
    #[error("simulation exceeded {ticks} ticks without finishing (stuck in phase '{phase}')")]
    IterationCapExceeded {
        /// Tick budget that was exhausted
        ticks: usize,
        /// Phase the envelope was in when the budget ran out
        phase: String,
    },

    /// Simulation options were rejected
    #[error("invalid simulation options: {0}")]
    InvalidOptions(String),

    /// The envelope failed while simulating
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `PhaseCurve` operations.
pub type Result<T> = std::result::Result<T, PhaseCurveError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::EVALUATION_ERROR, 4);
        assert_eq!(ExitCode::SIMULATION_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: PhaseCurveError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_evaluation_error_exit_code() {
        let err: PhaseCurveError = EnvelopeError::Evaluation {
            phase: "attack".to_string(),
            source: FormulaError::DivisionByZero,
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::EVALUATION_ERROR);

        let err: PhaseCurveError = EnvelopeError::NotActive.into();
        assert_eq!(err.exit_code(), ExitCode::ERROR);
    }

    #[test]
    fn test_simulation_error_exit_code() {
        let err: PhaseCurveError = SimulationError::IterationCapExceeded {
            ticks: 10,
            phase: "attack".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::SIMULATION_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: PhaseCurveError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_usage_error_exit_code() {
        let err = PhaseCurveError::Usage("bad --event".to_string());
        assert_eq!(err.exit_code(), ExitCode::USAGE_ERROR);
    }

    #[test]
    fn test_unknown_identifier_suggestion_display() {
        let err = FormulaError::UnknownIdentifier {
            name: "Y".to_string(),
            suggestion: Some("X".to_string()),
        };
        assert_eq!(err.to_string(), "unknown identifier 'Y' (did you mean 'X'?)");

        let err = FormulaError::UnknownFunction {
            name: "FOO".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown function 'FOO'");
    }

    #[test]
    fn test_evaluation_error_keeps_source() {
        use std::error::Error as _;
        let err = EnvelopeError::Evaluation {
            phase: "decay".to_string(),
            source: FormulaError::DivisionByZero,
        };
        assert!(err.to_string().contains("decay"));
        assert!(err.source().is_some());
    }
}
