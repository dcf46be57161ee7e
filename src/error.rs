//! # Error Module
//!
//! Unified error type for the acta engine.
//!
//! Errors are values: every public operation returns `Result<_, ExecError>`
//! and no failure escapes as a panic. Each variant carries a human-readable
//! message plus a structured `details` map so callers (and the retry /
//! compensation machinery) can inspect the failure without parsing strings.
//!
//! Conventional detail keys:
//!
//! - `action`: name of the action that failed
//! - `retry`: `false` suppresses the retry loop for this error
//! - `original_error`: the pre-compensation error, serialized
//! - `compensated` / `compensation_error` / `compensation_result`
//! - `timeout`: the elapsed budget in milliseconds

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Structured detail payload attached to every error.
pub type Details = serde_json::Map<String, Value>;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Execution,
    Timeout,
    Config,
    Compensation,
    Internal,
    InvalidInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
            ErrorKind::Compensation => "compensation",
            ErrorKind::Internal => "internal",
            ErrorKind::InvalidInput => "invalid_input",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// EXEC ERROR
// ============================================================================

/// Engine error value.
///
/// The variant is the taxonomy; `message` is for humans, `details` for
/// machines. Cloneable so an error can be stashed inside another error's
/// details (compensation wraps the original).
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecError {
    /// Schema violation, malformed params/context, invalid action.
    #[error("Validation error: {message}")]
    Validation { message: String, details: Details },

    /// Action returned an error, task died, or an action panicked.
    #[error("Execution failed: {message}")]
    Execution { message: String, details: Details },

    /// Deadline exceeded (action, workflow, or compensation).
    #[error("Timeout: {message}")]
    Timeout { message: String, details: Details },

    /// Bad engine or action configuration.
    #[error("Config error: {message}")]
    Config { message: String, details: Details },

    /// Wraps an original error plus the compensation outcome.
    #[error("{message}")]
    Compensation { message: String, details: Details },

    /// Unclassified fault inside the engine itself.
    #[error("Internal error: {message}")]
    Internal { message: String, details: Details },

    /// Malformed handle, non-owner await, unknown cancel argument.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String, details: Details },
}

impl ExecError {
    pub fn validation(message: impl Into<String>) -> Self {
        ExecError::Validation {
            message: message.into(),
            details: Details::new(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ExecError::Execution {
            message: message.into(),
            details: Details::new(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ExecError::Timeout {
            message: message.into(),
            details: Details::new(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ExecError::Config {
            message: message.into(),
            details: Details::new(),
        }
    }

    pub fn compensation(message: impl Into<String>) -> Self {
        ExecError::Compensation {
            message: message.into(),
            details: Details::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecError::Internal {
            message: message.into(),
            details: Details::new(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        ExecError::InvalidInput {
            message: message.into(),
            details: Details::new(),
        }
    }

    /// Attach a single detail key.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details_mut().insert(key.into(), value.into());
        self
    }

    /// Replace the whole details map.
    pub fn with_details(mut self, details: Details) -> Self {
        *self.details_mut() = details;
        self
    }

    /// Mark this error as non-retryable (`retry: false`).
    pub fn no_retry(self) -> Self {
        self.with_detail("retry", false)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Validation { .. } => ErrorKind::Validation,
            ExecError::Execution { .. } => ErrorKind::Execution,
            ExecError::Timeout { .. } => ErrorKind::Timeout,
            ExecError::Config { .. } => ErrorKind::Config,
            ExecError::Compensation { .. } => ErrorKind::Compensation,
            ExecError::Internal { .. } => ErrorKind::Internal,
            ExecError::InvalidInput { .. } => ErrorKind::InvalidInput,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExecError::Validation { message, .. }
            | ExecError::Execution { message, .. }
            | ExecError::Timeout { message, .. }
            | ExecError::Config { message, .. }
            | ExecError::Compensation { message, .. }
            | ExecError::Internal { message, .. }
            | ExecError::InvalidInput { message, .. } => message,
        }
    }

    pub fn details(&self) -> &Details {
        match self {
            ExecError::Validation { details, .. }
            | ExecError::Execution { details, .. }
            | ExecError::Timeout { details, .. }
            | ExecError::Config { details, .. }
            | ExecError::Compensation { details, .. }
            | ExecError::Internal { details, .. }
            | ExecError::InvalidInput { details, .. } => details,
        }
    }

    pub fn details_mut(&mut self) -> &mut Details {
        match self {
            ExecError::Validation { details, .. }
            | ExecError::Execution { details, .. }
            | ExecError::Timeout { details, .. }
            | ExecError::Config { details, .. }
            | ExecError::Compensation { details, .. }
            | ExecError::Internal { details, .. }
            | ExecError::InvalidInput { details, .. } => details,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    /// `false` only when the error explicitly carries `retry: false`.
    ///
    /// The retry loop combines this with its attempt budget; the flag is
    /// the error's own veto.
    pub fn retry_allowed(&self) -> bool {
        !matches!(self.details().get("retry"), Some(Value::Bool(false)))
    }

    /// Serialize into a `Value` suitable for embedding in another error's
    /// details (`{kind, message, details}`).
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.message(),
            "details": Value::Object(self.details().clone()),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
