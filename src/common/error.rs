//! Error types for the test-case engine
//!
//! Errors fall into four families that decide how far a failure travels:
//! load errors abort the whole run before anything executes, resolution and
//! execution errors end the current case only, and assertion failures are
//! recorded without stopping anything.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // === Load Errors ===
    #[error("Malformed definition in '{path}': {reason}")]
    Malformed { path: String, reason: String },

    #[error("Missing mandatory field '{field}' in {location}")]
    MissingField { field: String, location: String },

    #[error("Duplicate {kind} '{name}' (first defined in '{first}', again in '{second}')")]
    DuplicateDefinition {
        kind: String,
        name: String,
        first: String,
        second: String,
    },

    #[error("Duplicate case id '{0}' in the flattened run")]
    DuplicateCaseId(String),

    #[error("Unresolved {kind} reference '{name}'. Searched: {searched}")]
    UnresolvedReference {
        kind: String,
        name: String,
        searched: String,
    },

    #[error("Circular suite reference: {0}")]
    CircularReference(String),

    #[error("Reference '{name}' passes {given} argument(s) but its definition declares {expected}")]
    ArgumentMismatch {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    // === Resolution Errors ===
    #[error("Unresolved variable '${0}'")]
    UnresolvedVariable(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Bad arguments for '{function}': {message}")]
    ArgumentError { function: String, message: String },

    #[error("Template syntax error in '{input}': {message}")]
    TemplateSyntax { input: String, message: String },

    #[error("Self-referential variable chain: {0}")]
    CyclicVariable(String),

    #[error("Template nesting exceeds the maximum depth of {0}")]
    RecursionLimit(usize),

    // === Execution Errors ===
    #[error("Step '{kind}' failed: {message}")]
    StepFailed { kind: String, message: String },

    #[error("Function '{function}' failed: {message}")]
    FunctionFailed { function: String, message: String },

    // === Assertion Failures ===
    #[error("Assertion failed: {0}")]
    Assertion(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The failure families of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Fatal to the whole run, raised before execution starts
    Load,
    /// Template evaluation failed; fatal to the current case
    Resolution,
    /// A step executor or function failed; fatal to the current case
    Execution,
    /// A verify action evaluated to false
    Assertion,
    Config,
    Io,
}

impl Error {
    /// Create a malformed-definition error
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: &str, location: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.to_string(),
            location: location.into(),
        }
    }

    /// Create an unresolved reference error with the searched locations
    pub fn unresolved_reference<S: AsRef<str>>(kind: &str, name: &str, searched: &[S]) -> Self {
        Self::UnresolvedReference {
            kind: kind.to_string(),
            name: name.to_string(),
            searched: if searched.is_empty() {
                "<nothing>".to_string()
            } else {
                searched.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", ")
            },
        }
    }

    /// Create an argument error for a function call
    pub fn argument(function: &str, message: impl Into<String>) -> Self {
        Self::ArgumentError {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Create a template syntax error
    pub fn syntax(input: &str, message: impl Into<String>) -> Self {
        Self::TemplateSyntax {
            input: input.to_string(),
            message: message.into(),
        }
    }

    /// Create a step failure error
    pub fn step_failed(kind: &str, message: impl Into<String>) -> Self {
        Self::StepFailed {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Which family of the failure taxonomy this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Malformed { .. }
            | Error::MissingField { .. }
            | Error::DuplicateDefinition { .. }
            | Error::DuplicateCaseId(_)
            | Error::UnresolvedReference { .. }
            | Error::CircularReference(_)
            | Error::ArgumentMismatch { .. }
            | Error::InvalidPattern { .. }
            | Error::FileRead { .. } => ErrorCategory::Load,
            Error::UnresolvedVariable(_)
            | Error::UnknownFunction(_)
            | Error::ArgumentError { .. }
            | Error::TemplateSyntax { .. }
            | Error::CyclicVariable(_)
            | Error::RecursionLimit(_) => ErrorCategory::Resolution,
            Error::StepFailed { .. } | Error::FunctionFailed { .. } | Error::Json(_) => {
                ErrorCategory::Execution
            }
            Error::Assertion(_) => ErrorCategory::Assertion,
            Error::Config(_) | Error::ConfigParse(_) => ErrorCategory::Config,
            Error::Io(_) => ErrorCategory::Io,
        }
    }

    /// Stable code recorded in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Malformed { .. } => "MALFORMED_DEFINITION",
            Error::MissingField { .. } => "MISSING_FIELD",
            Error::DuplicateDefinition { .. } => "DUPLICATE_DEFINITION",
            Error::DuplicateCaseId(_) => "DUPLICATE_CASE_ID",
            Error::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            Error::CircularReference(_) => "CIRCULAR_REFERENCE",
            Error::ArgumentMismatch { .. } => "ARGUMENT_MISMATCH",
            Error::InvalidPattern { .. } => "INVALID_PATTERN",
            Error::UnresolvedVariable(_) => "UNRESOLVED_VARIABLE",
            Error::UnknownFunction(_) => "UNKNOWN_FUNCTION",
            Error::ArgumentError { .. } => "ARGUMENT_ERROR",
            Error::TemplateSyntax { .. } => "TEMPLATE_SYNTAX",
            Error::CyclicVariable(_) => "CYCLIC_VARIABLE",
            Error::RecursionLimit(_) => "RECURSION_LIMIT",
            Error::StepFailed { .. } => "STEP_FAILED",
            Error::FunctionFailed { .. } => "FUNCTION_FAILED",
            Error::Assertion(_) => "ASSERTION_FAILED",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            Error::Io(_) => "IO",
            Error::FileRead { .. } => "FILE_READ",
            Error::Json(_) => "JSON",
        }
    }

    /// True for errors that must abort the run before any case executes
    pub fn is_load_error(&self) -> bool {
        self.category() == ErrorCategory::Load
    }
}
