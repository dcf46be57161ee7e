//! Shared test actions for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use acta::{
    Action, ActionOutput, ActionResult, CompensationSpec, ExecError, Field, FieldKind, Params,
    RunContext, Schema,
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// `{value, amount}` -> `{value: value + amount}`; amount defaults to 1.
pub struct AddAction;

#[async_trait]
impl Action for AddAction {
    fn name(&self) -> &str {
        "add_value"
    }

    fn description(&self) -> Option<&str> {
        Some("Adds amount to value")
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .field(Field::new("value", FieldKind::Integer).required())
            .field(Field::new("amount", FieldKind::Integer).with_default(1))
    }

    async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
        let value = params["value"].as_i64().unwrap_or(0);
        let amount = params["amount"].as_i64().unwrap_or(1);
        Ok(ActionOutput::from_json(json!({"value": value + amount})))
    }
}

/// `{value, amount}` -> `{value: value * amount}`.
pub struct MultiplyAction;

#[async_trait]
impl Action for MultiplyAction {
    fn name(&self) -> &str {
        "multiply_value"
    }

    async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
        let value = params.get("value").and_then(Value::as_i64).unwrap_or(0);
        let amount = params.get("amount").and_then(Value::as_i64).unwrap_or(1);
        Ok(ActionOutput::from_json(json!({"value": value * amount})))
    }
}

/// `{value, amount}` -> `{value: value - amount}`.
pub struct SubtractAction;

#[async_trait]
impl Action for SubtractAction {
    fn name(&self) -> &str {
        "subtract_value"
    }

    async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
        let value = params.get("value").and_then(Value::as_i64).unwrap_or(0);
        let amount = params.get("amount").and_then(Value::as_i64).unwrap_or(1);
        Ok(ActionOutput::from_json(json!({"value": value - amount})))
    }
}

/// Sleeps `delay` ms (param or field default), then echoes its params.
pub struct SlowAction {
    pub delay_ms: u64,
}

impl SlowAction {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

#[async_trait]
impl Action for SlowAction {
    fn name(&self) -> &str {
        "slow_action"
    }

    async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
        let delay = params
            .get("delay")
            .and_then(Value::as_u64)
            .unwrap_or(self.delay_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(ActionOutput::new(params))
    }
}

/// Hangs forever; only a timeout gets rid of it.
pub struct HangAction;

#[async_trait]
impl Action for HangAction {
    fn name(&self) -> &str {
        "hang_forever"
    }

    async fn execute(&self, _params: Params, _context: &RunContext) -> ActionResult {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(ActionOutput::default())
    }
}

/// Fails `failures_left` times, then succeeds.
pub struct FlakyAction {
    pub failures_left: AtomicU32,
}

impl FlakyAction {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl Action for FlakyAction {
    fn name(&self) -> &str {
        "flaky_action"
    }

    async fn execute(&self, _params: Params, _context: &RunContext) -> ActionResult {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            Err(ExecError::execution("transient failure"))
        } else {
            Ok(ActionOutput::from_json(json!({"recovered": true})))
        }
    }
}

/// Saga test action. `should_fail: true` makes execute fail with
/// "Intentional failure"; `on_error` optionally sleeps `delay` ms and
/// passes `test_value` through into its result.
pub struct CompensatingAction;

#[async_trait]
impl Action for CompensatingAction {
    fn name(&self) -> &str {
        "compensating_action"
    }

    fn compensation(&self) -> CompensationSpec {
        CompensationSpec::enabled()
    }

    async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
        if params.get("should_fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ExecError::execution("Intentional failure").no_retry());
        }
        Ok(ActionOutput::from_json(json!({"completed": true})))
    }

    async fn on_error(
        &self,
        params: Params,
        _error: ExecError,
        _context: &RunContext,
        _opts: &Params,
    ) -> Result<Params, ExecError> {
        if let Some(delay) = params.get("delay").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let mut out = Params::new();
        out.insert("rolled_back".into(), true.into());
        if let Some(test_value) = params.get("test_value") {
            out.insert("test_value".into(), test_value.clone());
        }
        Ok(out)
    }
}

/// Always fails, non-retryable.
pub struct FailAction;

#[async_trait]
impl Action for FailAction {
    fn name(&self) -> &str {
        "fail_action"
    }

    async fn execute(&self, _params: Params, _context: &RunContext) -> ActionResult {
        Err(ExecError::execution("deliberate failure").no_retry())
    }
}
