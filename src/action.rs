//! # Action Trait
//!
//! An action is a named, versioned, schema-validated unit of work. The
//! engine only ever sees this trait: metadata, input/output schemas, the
//! async `execute`, lifecycle hooks, and the optional compensation
//! (`on_error`) handler.
//!
//! Metadata and schemas are immutable after definition. Name uniqueness is
//! not enforced: two actions may share a name; callers who need a
//! registry enforce their own.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::context::RunContext;
use crate::error::ExecError;
use crate::params::Params;
use crate::schema::Schema;

/// Action names: alphanumeric plus underscore, starting with a letter.
static ACTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid pattern"));

// ============================================================================
// ACTION OUTPUT
// ============================================================================

/// Successful action result: a result mapping plus an optional opaque
/// directive the engine forwards untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    pub result: Params,
    pub directive: Option<Value>,
}

impl ActionOutput {
    pub fn new(result: Params) -> Self {
        Self {
            result,
            directive: None,
        }
    }

    /// Build from a JSON object literal; panics on non-objects, so only
    /// for action implementations that control the literal.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            other => panic!("ActionOutput::from_json expects an object, got {other}"),
        }
    }

    pub fn with_directive(mut self, directive: impl Into<Value>) -> Self {
        self.directive = Some(directive.into());
        self
    }
}

/// What `execute` returns.
pub type ActionResult = Result<ActionOutput, ExecError>;

// ============================================================================
// COMPENSATION SPEC
// ============================================================================

/// Per-action compensation settings. Disabled by default; when enabled the
/// engine runs `on_error` after the retry budget is exhausted.
#[derive(Debug, Clone)]
pub struct CompensationSpec {
    pub enabled: bool,
    pub max_retries: u32,
    /// Budget for the handler in ms; `None` falls back to the engine
    /// default.
    pub timeout: Option<u64>,
}

impl Default for CompensationSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 1,
            timeout: None,
        }
    }
}

impl CompensationSpec {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

// ============================================================================
// ACTION
// ============================================================================

/// A unit of work the engine can run.
///
/// Only `name` and `execute` are mandatory; everything else has a
/// pass-through default. Hooks run in declaration order around the two
/// validation phases:
///
/// `on_before_validate_params` → schema → `on_after_validate_params` →
/// `execute` → `on_before_validate_output` → output schema →
/// `on_after_validate_output` → `on_after_run`
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn category(&self) -> Option<&str> {
        None
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn version(&self) -> Option<&str> {
        None
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
    }

    fn output_schema(&self) -> Option<Schema> {
        None
    }

    fn compensation(&self) -> CompensationSpec {
        CompensationSpec::default()
    }

    async fn execute(&self, params: Params, context: &RunContext) -> ActionResult;

    fn on_before_validate_params(&self, params: Params) -> Result<Params, ExecError> {
        Ok(params)
    }

    fn on_after_validate_params(&self, params: Params) -> Result<Params, ExecError> {
        Ok(params)
    }

    fn on_before_validate_output(&self, output: Params) -> Result<Params, ExecError> {
        Ok(output)
    }

    fn on_after_validate_output(&self, output: Params) -> Result<Params, ExecError> {
        Ok(output)
    }

    fn on_after_run(&self, output: ActionOutput) -> Result<ActionOutput, ExecError> {
        Ok(output)
    }

    /// Compensation handler. Receives the params of the failed run, the
    /// final error, the context, and the run opts as a map. The returned
    /// map becomes `compensation_result` and its keys are promoted into
    /// the compensation error's details.
    async fn on_error(
        &self,
        params: Params,
        error: ExecError,
        context: &RunContext,
        opts: &Params,
    ) -> Result<Params, ExecError> {
        let _ = (params, error, context, opts);
        Ok(Params::new())
    }
}

/// Shared, dynamically dispatched action reference.
pub type ActionRef = Arc<dyn Action>;

// ============================================================================
// VALIDATION & METADATA
// ============================================================================

/// Check an action is runnable: valid name, well-formed schemas.
pub fn validate_action(action: &dyn Action) -> Result<(), ExecError> {
    let name = action.name();
    if !ACTION_NAME.is_match(name) {
        return Err(ExecError::validation(format!("invalid action name: {name:?}"))
            .with_detail("name", name)
            .no_retry());
    }
    action
        .input_schema()
        .check_well_formed()
        .map_err(|err| annotate(err, name))?;
    if let Some(schema) = action.output_schema() {
        schema.check_well_formed().map_err(|err| annotate(err, name))?;
    }
    Ok(())
}

fn annotate(err: ExecError, name: &str) -> ExecError {
    err.with_detail("action", name)
}

/// Metadata value injected into the run context under `action_metadata`.
pub fn action_metadata(action: &dyn Action) -> Value {
    serde_json::json!({
        "name": action.name(),
        "description": action.description(),
        "category": action.category(),
        "tags": action.tags(),
        "version": action.version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
            Ok(ActionOutput::new(params))
        }
    }

    struct BadName;

    #[async_trait]
    impl Action for BadName {
        fn name(&self) -> &str {
            "9lives"
        }

        async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
            Ok(ActionOutput::new(params))
        }
    }

    #[test]
    fn valid_names_pass() {
        assert!(validate_action(&Echo).is_ok());
    }

    #[test]
    fn leading_digit_rejected() {
        let err = validate_action(&BadName).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(!err.retry_allowed());
    }

    #[test]
    fn name_pattern_rules() {
        for ok in ["a", "add_value", "Fetch2", "x_y_z"] {
            assert!(ACTION_NAME.is_match(ok), "{ok} should be valid");
        }
        for bad in ["", "_x", "1x", "with-dash", "with space", "dot.name"] {
            assert!(!ACTION_NAME.is_match(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn metadata_carries_identity() {
        let meta = action_metadata(&Echo);
        assert_eq!(meta["name"], json!("echo"));
        assert_eq!(meta["tags"], json!([]));
    }

    #[test]
    fn bad_schema_default_rejected() {
        struct BadDefault;

        #[async_trait]
        impl Action for BadDefault {
            fn name(&self) -> &str {
                "bad_default"
            }

            fn input_schema(&self) -> Schema {
                Schema::new().field(Field::new("n", FieldKind::Integer).with_default("one"))
            }

            async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
                Ok(ActionOutput::new(params))
            }
        }

        let err = validate_action(&BadDefault).unwrap_err();
        assert_eq!(err.details()["action"], json!("bad_default"));
    }

    #[tokio::test]
    async fn default_on_error_returns_empty() {
        let out = Echo
            .on_error(
                Params::new(),
                ExecError::execution("boom"),
                &RunContext::default(),
                &Params::new(),
            )
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn output_with_directive() {
        let out = ActionOutput::from_json(json!({"value": 1})).with_directive(json!({"emit": true}));
        assert_eq!(out.directive, Some(json!({"emit": true})));
    }
}
