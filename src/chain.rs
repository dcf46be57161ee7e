//! # Chains
//!
//! Sequential composition with result accumulation: each action's result
//! map merges into the running params so later actions read earlier
//! outputs, and the merged map is the final result. The first failure
//! halts the chain; an interrupt probe can halt it cleanly between
//! actions with the partial params.
//!
//! Directives ride along: a directive attached by any action is
//! preserved across later directive-less successes and surfaced with the
//! completed result; a failing action's directive travels inside its
//! error details.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::action::ActionRef;
use crate::error::ExecError;
use crate::exec::{Executor, RunOptions};
use crate::context::RunContext;
use crate::handle::AsyncHandle;
use crate::lifecycle::{self, LifecycleOptions};
use crate::params::{self, Params};

/// What a chain resolves to.
pub type ChainResult = Result<ChainOutcome, ExecError>;

/// Handle for an async chain run.
pub type ChainHandle = AsyncHandle<ChainResult>;

/// Interrupt probe evaluated before each action; `true` halts the chain.
pub type InterruptCheck = Arc<dyn Fn() -> bool + Send + Sync>;

// ============================================================================
// ITEMS & OUTCOME
// ============================================================================

/// One chain entry: an action, optionally with per-item param overrides
/// that merge into the running params before the call (and stay merged
/// for the rest of the chain).
#[derive(Clone)]
pub enum ChainItem {
    Action(ActionRef),
    WithParams(ActionRef, Value),
}

impl From<ActionRef> for ChainItem {
    fn from(action: ActionRef) -> Self {
        ChainItem::Action(action)
    }
}

impl From<(ActionRef, Value)> for ChainItem {
    fn from((action, params): (ActionRef, Value)) -> Self {
        ChainItem::WithParams(action, params)
    }
}

/// Terminal state of a chain run.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// All actions ran; `result` is the accumulated params.
    Completed {
        result: Params,
        directive: Option<Value>,
    },
    /// The interrupt probe fired; `partial` is the accumulation so far.
    Interrupted { partial: Params },
}

impl ChainOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ChainOutcome::Interrupted { .. })
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Chain options: shared context, the interrupt probe, and the per-action
/// run options (timeout, retries, telemetry, pool routing).
#[derive(Clone, Default)]
pub struct ChainOptions {
    pub context: Option<Value>,
    pub interrupt_check: Option<InterruptCheck>,
    pub run: RunOptions,
}

impl ChainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_interrupt_check(
        mut self,
        check: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.interrupt_check = Some(Arc::new(check));
        self
    }

    pub fn with_run_options(mut self, run: RunOptions) -> Self {
        self.run = run;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.run = self.run.with_timeout_ms(ms);
        self
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Run a chain to completion.
///
/// Chain params must be a plain map; anything else (including null) is
/// InvalidInput. There is no pair-list shorthand here.
pub async fn run(
    executor: &Executor,
    items: Vec<ChainItem>,
    initial_params: Value,
    opts: ChainOptions,
) -> ChainResult {
    let mut running = match initial_params {
        Value::Object(map) => map,
        other => {
            return Err(
                ExecError::invalid_input("chain params must be a map").with_detail(
                    "got",
                    params::type_name(&other),
                ),
            )
        }
    };

    let context = RunContext::from_value(opts.context.clone().unwrap_or(Value::Object(Params::new())))?;
    let mut directive: Option<Value> = None;

    for item in items {
        if let Some(check) = &opts.interrupt_check {
            if check() {
                return Ok(ChainOutcome::Interrupted { partial: running });
            }
        }

        let (action, overrides) = match item {
            ChainItem::Action(action) => (action, None),
            ChainItem::WithParams(action, p) => (action, Some(params::normalize(p)?)),
        };
        if let Some(overrides) = overrides {
            params::merge(&mut running, &overrides);
        }

        let output = executor
            .run_prepared(action, running.clone(), context.clone(), opts.run.clone())
            .await?;

        params::merge(&mut running, &output.result);
        if output.directive.is_some() {
            directive = output.directive;
        }
    }

    Ok(ChainOutcome::Completed {
        result: running,
        directive,
    })
}

/// Start a chain without waiting; the handle is bound to the caller.
pub fn run_async(
    executor: &Executor,
    items: Vec<ChainItem>,
    initial_params: Value,
    opts: ChainOptions,
) -> Result<ChainHandle, ExecError> {
    let pool = crate::supervisor::resolve_pool(opts.run.task_pool.as_ref(), opts.run.tenant.as_deref())?;
    let executor = executor.clone();
    Ok(AsyncHandle::spawn(&pool, move || async move {
        run(&executor, items, initial_params, opts).await
    }))
}

/// Await an async chain with an explicit budget. Owner-bound like every
/// handle.
pub async fn await_result(
    executor: &Executor,
    handle: ChainHandle,
    timeout: Option<Duration>,
) -> ChainResult {
    handle.check_owner()?;
    let config = executor.config();
    let budget = timeout.unwrap_or(config.default_await_duration());
    let lopts = LifecycleOptions::new(handle.pool().clone(), "chain")
        .with_down_grace(Duration::from_millis(config.chain_down_grace))
        .with_shutdown_grace(Duration::from_millis(config.chain_shutdown_grace))
        .with_flush(
            Duration::from_millis(config.flush_timeout),
            config.max_flush_messages,
        );
    let (rx, join) = handle.into_parts();
    match lifecycle::await_outcome(rx, join, Some(budget), &lopts).await {
        Ok(result) => result,
        Err(err) => Err(err),
    }
}

/// Cancel an async chain. Ok regardless of prior completion.
pub async fn cancel(executor: &Executor, handle: ChainHandle) -> Result<(), ExecError> {
    let config = executor.config();
    handle
        .cancel(
            Duration::from_millis(config.chain_shutdown_grace),
            Duration::from_millis(config.flush_timeout),
            config.max_flush_messages,
        )
        .await;
    Ok(())
}
