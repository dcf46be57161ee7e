//! # Compensation
//!
//! Saga-style rollback: when an action's retry budget is spent and the
//! action declares compensation enabled, the engine runs its `on_error`
//! handler under its own deadline. The final outcome is always a
//! Compensation error; whether the handler succeeded is a detail
//! (`compensated: true/false`), never a resurrection of the run.
//!
//! This is a second *kind* of attempt, not another retry: the handler
//! gets the original params, the final error, and the run context, and
//! its job is to undo effects, not to produce the result.

use std::time::Duration;

use crate::action::ActionRef;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::{Details, ExecError};
use crate::exec::RunOptions;
use crate::lifecycle::{self, LifecycleOptions};
use crate::params::Params;
use crate::supervisor::TaskPool;

/// Detail keys reserved for the engine; handler result keys never
/// overwrite these when promoted.
const RESERVED: &[&str] = &[
    "compensated",
    "compensation_result",
    "compensation_error",
    "original_error",
    "directive",
];

/// Run the compensation path for a failed action. Returns the error the
/// caller should surface: the original error untouched when compensation
/// is disabled, otherwise a Compensation error wrapping the outcome.
pub(crate) async fn compensate(
    config: &EngineConfig,
    pool: &TaskPool,
    action: &ActionRef,
    params: &Params,
    context: &RunContext,
    original: ExecError,
    opts: &RunOptions,
) -> ExecError {
    let spec = action.compensation();
    if !spec.enabled {
        return original;
    }

    let timeout_ms = spec
        .timeout
        .or(opts.compensation_timeout_ms)
        .or(opts.timeout_ms())
        .unwrap_or(config.default_compensation_timeout);

    let handler_opts = {
        let mut map = Params::new();
        map.insert("timeout".into(), timeout_ms.into());
        map.insert("max_retries".into(), spec.max_retries.into());
        map
    };

    let lopts = LifecycleOptions::new(pool.clone(), format!("{} compensation", action.name()))
        .with_down_grace(Duration::from_millis(config.compensation_down_grace))
        .with_shutdown_grace(Duration::from_millis(config.async_shutdown_grace))
        .with_flush(
            Duration::from_millis(config.flush_timeout),
            config.max_flush_messages,
        );

    let fut = {
        let action = action.clone();
        let params = params.clone();
        let context = context.clone();
        let error = original.clone();
        let handler_opts = handler_opts.clone();
        async move { action.on_error(params, error, &context, &handler_opts).await }
    };

    let outcome = lifecycle::run(fut, Some(Duration::from_millis(timeout_ms)), &lopts).await;

    let mut details = Details::new();
    details.insert("original_error".into(), original.to_value());
    if let Some(directive) = original.details().get("directive") {
        details.insert("directive".into(), directive.clone());
    }

    match outcome {
        // Handler ran and reported success: effects rolled back.
        Ok(Ok(result)) => {
            details.insert("compensated".into(), true.into());
            details.insert(
                "compensation_result".into(),
                serde_json::Value::Object(result.clone()),
            );
            for (key, value) in result {
                if !RESERVED.contains(&key.as_str()) {
                    details.entry(key).or_insert(value);
                }
            }
            ExecError::compensation(format!(
                "Compensation completed for: {}",
                original.message()
            ))
            .with_details(details)
        }

        // Handler ran and failed.
        Ok(Err(err)) => {
            details.insert("compensated".into(), false.into());
            details.insert("compensation_error".into(), err.to_value());
            ExecError::compensation(format!("Compensation failed for: {}", original.message()))
                .with_details(details)
        }

        // Handler blew its own deadline (or its task died).
        Err(err) => {
            details.insert("compensated".into(), false.into());
            let reason = if err.is_timeout() {
                format!("Compensation timed out after {timeout_ms}ms")
            } else {
                err.message().to_string()
            };
            details.insert("compensation_error".into(), reason.into());
            ExecError::compensation(format!("Compensation failed for: {}", original.message()))
                .with_details(details)
        }
    }
}
