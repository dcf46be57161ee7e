//! # Executor
//!
//! Orchestrates one action run end to end: normalize → validate →
//! telemetry span → supervised timed run → retry loop → compensation.
//! Also the front door for async runs (`run_async` / `await_result` /
//! `cancel`) and instruction execution.
//!
//! The executor holds the [`EngineConfig`] by reference count; cloning is
//! cheap and clones share nothing mutable. Config is read once per call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::Instrument;

use crate::action::{self, ActionOutput, ActionRef};
use crate::compensation;
use crate::config::EngineConfig;
use crate::context::{Deadline, RunContext};
use crate::error::ExecError;
use crate::handle::AsyncHandle;
use crate::instruction::Instruction;
use crate::lifecycle::{self, LifecycleOptions};
use crate::params::{self, Params};
use crate::retry;
use crate::supervisor::{self, TaskPool};
use crate::telemetry::{self, LogLevel, TelemetryMode};

/// What every run returns.
pub type ExecResult = Result<ActionOutput, ExecError>;

/// Handle for an async single-action run.
pub type ActionHandle = AsyncHandle<ExecResult>;

// ============================================================================
// RUN OPTIONS
// ============================================================================

/// Per-run timeout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Ms(u64),
    /// No deadline at all
    Infinity,
}

/// Options recognized by every run. Unset fields fall back to the engine
/// config; merging (instruction normalization) lets set fields win.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Timeout>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub compensation_timeout_ms: Option<u64>,
    pub log_level: Option<LogLevel>,
    pub telemetry: Option<TelemetryMode>,
    /// Route to this tenant's registered task pool
    pub tenant: Option<String>,
    /// Explicit pool; wins over `tenant`
    pub task_pool: Option<TaskPool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Some(Timeout::Ms(ms));
        self
    }

    pub fn with_infinite_timeout(mut self) -> Self {
        self.timeout = Some(Timeout::Infinity);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_backoff_ms(mut self, ms: u64) -> Self {
        self.backoff_ms = Some(ms);
        self
    }

    pub fn with_compensation_timeout_ms(mut self, ms: u64) -> Self {
        self.compensation_timeout_ms = Some(ms);
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn with_telemetry(mut self, mode: TelemetryMode) -> Self {
        self.telemetry = Some(mode);
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_task_pool(mut self, pool: TaskPool) -> Self {
        self.task_pool = Some(pool);
        self
    }

    /// The requested timeout in ms, when finite.
    pub fn timeout_ms(&self) -> Option<u64> {
        match self.timeout {
            Some(Timeout::Ms(ms)) => Some(ms),
            _ => None,
        }
    }

    /// Field-wise merge; `self` wins where set.
    pub fn merged_over(&self, base: &RunOptions) -> RunOptions {
        RunOptions {
            timeout: self.timeout.or(base.timeout),
            max_retries: self.max_retries.or(base.max_retries),
            backoff_ms: self.backoff_ms.or(base.backoff_ms),
            compensation_timeout_ms: self
                .compensation_timeout_ms
                .or(base.compensation_timeout_ms),
            log_level: self.log_level.or(base.log_level),
            telemetry: self.telemetry.or(base.telemetry),
            tenant: self.tenant.clone().or_else(|| base.tenant.clone()),
            task_pool: self.task_pool.clone().or_else(|| base.task_pool.clone()),
        }
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// The execution engine. Cheap to clone.
#[derive(Clone, Default)]
pub struct Executor {
    config: Arc<EngineConfig>,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Synchronous run
    // ------------------------------------------------------------------

    /// Run an action to completion: validation, retries, compensation.
    pub async fn run(
        &self,
        action: ActionRef,
        params: Value,
        context: Value,
        opts: RunOptions,
    ) -> ExecResult {
        let params = params::normalize(params)?;
        let context = RunContext::from_value(context)?;
        self.run_prepared(action, params, context, opts).await
    }

    /// Run a canonical instruction.
    pub async fn run_instruction(&self, instruction: Instruction) -> ExecResult {
        let context = RunContext::from_value(Value::Object(instruction.context))?;
        self.run_prepared(instruction.action, instruction.params, context, instruction.opts)
            .await
    }

    pub(crate) async fn run_prepared(
        &self,
        action: ActionRef,
        params: Params,
        mut context: RunContext,
        opts: RunOptions,
    ) -> ExecResult {
        action::validate_action(action.as_ref())?;

        let name = action.name().to_string();
        let params = action.on_before_validate_params(params)?;
        let params = action
            .input_schema()
            .validate(&params)
            .map_err(|err| err.with_detail("action", name.as_str()))?;
        let params = action.on_after_validate_params(params)?;

        context.action_metadata = Some(action::action_metadata(action.as_ref()));

        let max_retries = opts.max_retries.unwrap_or(self.config.default_max_retries);
        let backoff = opts.backoff_ms.unwrap_or(self.config.default_backoff);
        let mode = opts.telemetry.unwrap_or_default();
        let threshold = opts.log_level.unwrap_or_default();

        let mut attempt: u32 = 0;
        loop {
            match self.do_run(&action, &params, &context, &opts).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    if retry::should_retry(&err, attempt, max_retries) {
                        telemetry::action_retry(
                            mode,
                            threshold,
                            &name,
                            attempt + 1,
                            max_retries,
                            retry::backoff_delay(backoff, attempt, self.config.default_max_backoff),
                        );
                        retry::wait_backoff(backoff, attempt, self.config.default_max_backoff)
                            .await;
                        attempt += 1;
                        continue;
                    }

                    let pool =
                        supervisor::resolve_pool(opts.task_pool.as_ref(), opts.tenant.as_deref())?;
                    return Err(compensation::compensate(
                        &self.config,
                        &pool,
                        &action,
                        &params,
                        &context,
                        err,
                        &opts,
                    )
                    .await);
                }
            }
        }
    }

    /// One attempt: resolve the budget, wrap in a span, hand to the task
    /// lifecycle, validate the output.
    async fn do_run(
        &self,
        action: &ActionRef,
        params: &Params,
        context: &RunContext,
        opts: &RunOptions,
    ) -> ExecResult {
        let name = action.name().to_string();
        let mode = opts.telemetry.unwrap_or_default();
        let threshold = opts.log_level.unwrap_or_default();

        let timeout = self.resolve_timeout(opts);

        let mut attempt_ctx = context.clone();
        if let Some(duration) = timeout {
            attempt_ctx.constrain_exec_deadline(Deadline::from_duration(duration));
        }
        // The wait budget honors the workflow deadline too, so a nested
        // step can never outlive its workflow.
        let wait = attempt_ctx.effective_deadline().map(|d| d.remaining());

        let pool = supervisor::resolve_pool(opts.task_pool.as_ref(), opts.tenant.as_deref())?;
        let lopts = LifecycleOptions::new(pool, name.clone())
            .with_down_grace(Duration::from_millis(self.config.exec_down_grace))
            .with_shutdown_grace(Duration::from_millis(self.config.async_shutdown_grace))
            .with_flush(
                Duration::from_millis(self.config.flush_timeout),
                self.config.max_flush_messages,
            );

        telemetry::action_start(mode, threshold, &name, params);
        let started = Instant::now();

        let fut = {
            let action = Arc::clone(action);
            let params = params.clone();
            let ctx = attempt_ctx.clone();
            let span = telemetry::action_span(&name);
            async move { action.execute(params, &ctx).await }.instrument(span)
        };

        let outcome = match lifecycle::run(fut, wait, &lopts).await {
            Ok(inner) => inner,
            Err(lifecycle_err) => Err(lifecycle_err),
        };

        match outcome {
            Ok(output) => {
                let output = self.validate_output(action, output)?;
                telemetry::action_stop(mode, threshold, &name, started.elapsed(), &output.result);
                Ok(output)
            }
            Err(err) => {
                let err = err.with_detail("action", name.as_str());
                telemetry::action_error(mode, threshold, &name, started.elapsed(), &err);
                Err(err)
            }
        }
    }

    /// Requested timeout → effective budget. `None` = unbounded.
    fn resolve_timeout(&self, opts: &RunOptions) -> Option<Duration> {
        match opts.timeout {
            Some(Timeout::Infinity) => None,
            Some(Timeout::Ms(0)) if !self.config.zero_timeout_is_immediate => {
                Some(self.config.default_timeout_duration())
            }
            Some(Timeout::Ms(ms)) => Some(Duration::from_millis(ms)),
            None => Some(self.config.default_timeout_duration()),
        }
    }

    fn validate_output(&self, action: &ActionRef, output: ActionOutput) -> ExecResult {
        let output = match action.output_schema() {
            Some(schema) => {
                let result = action.on_before_validate_output(output.result)?;
                let result = schema
                    .validate(&result)
                    .map_err(|err| err.with_detail("action", action.name()).no_retry())?;
                let result = action.on_after_validate_output(result)?;
                ActionOutput {
                    result,
                    directive: output.directive,
                }
            }
            None => output,
        };
        action.on_after_run(output)
    }

    // ------------------------------------------------------------------
    // Async runs
    // ------------------------------------------------------------------

    /// Start an action without waiting. The returned handle is bound to
    /// the calling task; only it may await.
    pub fn run_async(
        &self,
        action: ActionRef,
        params: Value,
        context: Value,
        opts: RunOptions,
    ) -> Result<ActionHandle, ExecError> {
        let pool = supervisor::resolve_pool(opts.task_pool.as_ref(), opts.tenant.as_deref())?;
        let executor = self.clone();
        Ok(AsyncHandle::spawn(&pool, move || async move {
            executor.run(action, params, context, opts).await
        }))
    }

    /// Await with the configured default budget.
    pub async fn await_result(&self, handle: ActionHandle) -> ExecResult {
        self.await_timeout(handle, self.config.default_await_duration())
            .await
    }

    /// Await with an explicit budget. Only the owning task may call this;
    /// anyone else gets InvalidInput.
    pub async fn await_timeout(&self, handle: ActionHandle, timeout: Duration) -> ExecResult {
        handle.check_owner()?;
        let lopts = LifecycleOptions::new(handle.pool().clone(), "async action")
            .with_down_grace(Duration::from_millis(self.config.async_down_grace))
            .with_shutdown_grace(Duration::from_millis(self.config.async_shutdown_grace))
            .with_flush(
                Duration::from_millis(self.config.flush_timeout),
                self.config.max_flush_messages,
            );
        let (rx, join) = handle.into_parts();
        match lifecycle::await_outcome(rx, join, Some(timeout), &lopts).await {
            Ok(result) => result,
            Err(err) => Err(err),
        }
    }

    /// Cancel an in-flight async run: shutdown, then kill, then drain.
    /// Ok even when the run already completed.
    pub async fn cancel(&self, handle: ActionHandle) -> Result<(), ExecError> {
        handle
            .cancel(
                Duration::from_millis(self.config.async_shutdown_grace),
                Duration::from_millis(self.config.flush_timeout),
                self.config.max_flush_messages,
            )
            .await;
        Ok(())
    }
}
