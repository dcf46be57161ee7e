//! # Workflows
//!
//! A workflow is itself an action: its `execute` interprets a step
//! program. Step kinds: plain steps, branches, converge markers, and
//! bounded-parallel fans. Every step's result map
//! accumulates into both the running params (visible to later steps) and
//! the final results.
//!
//! Deadline rules: the workflow derives one deadline on entry and no step
//! may start after it elapses; nested instructions run with
//! `min(remaining budget, their own timeout)`, so a child can never
//! outlive the workflow.
//!
//! The parallel step runs its instructions on a pool scoped to the step
//! and held by a shutdown guard: when the workflow future goes away
//! (cancellation, owner death), the guard shuts the pool down and every
//! in-flight child is aborted with it.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::action::{Action, ActionOutput, ActionResult};
use crate::context::{Deadline, RunContext};
use crate::error::ExecError;
use crate::exec::Executor;
use crate::instruction::Instruction;
use crate::params::{self, Params};
use crate::supervisor::TaskPool;

/// Result key the parallel step writes its collected outcomes under.
pub const PARALLEL_RESULTS_KEY: &str = "parallel_results";

// ============================================================================
// STEP GRAMMAR
// ============================================================================

/// Per-step metadata. All fields optional; unset fields fall back to the
/// enclosing workflow, the context, or the engine config.
#[derive(Debug, Clone, Default)]
pub struct StepMeta {
    pub name: Option<String>,
    /// Per-instruction budget (ms)
    pub timeout: Option<u64>,
    /// Parallel-step per-task budget (ms); wins over `timeout`
    pub parallel_timeout: Option<u64>,
    /// Parallel-step concurrency cap; defaults to host parallelism
    pub max_concurrency: Option<usize>,
    /// Collect parallel results in input order
    pub ordered: bool,
}

impl StepMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    pub fn with_parallel_timeout(mut self, ms: u64) -> Self {
        self.parallel_timeout = Some(ms);
        self
    }

    pub fn with_max_concurrency(mut self, cap: usize) -> Self {
        self.max_concurrency = Some(cap);
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }
}

/// Branch condition: a literal, or a truthy lookup in the running params.
#[derive(Debug, Clone)]
pub enum Condition {
    Bool(bool),
    Param(String),
}

impl Condition {
    fn resolve(&self, running: &Params) -> bool {
        match self {
            Condition::Bool(value) => *value,
            Condition::Param(key) => running.get(key).map(truthy).unwrap_or(false),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// One step of the program.
#[derive(Clone)]
pub enum WorkflowStep {
    /// Execute one instruction
    Step {
        meta: StepMeta,
        instruction: Instruction,
    },
    /// Conditional dispatch into one of two sub-programs
    Branch {
        meta: StepMeta,
        condition: Condition,
        on_true: Vec<WorkflowStep>,
        on_false: Vec<WorkflowStep>,
    },
    /// Join marker after a branch; executes like a step
    Converge {
        meta: StepMeta,
        instruction: Instruction,
    },
    /// Bounded-concurrent execution of several instructions
    Parallel {
        meta: StepMeta,
        instructions: Vec<Instruction>,
    },
}

impl WorkflowStep {
    pub fn step(instruction: Instruction) -> Self {
        WorkflowStep::Step {
            meta: StepMeta::new(),
            instruction,
        }
    }
}

// ============================================================================
// WORKFLOW
// ============================================================================

/// Step-program action. Build with the fluent methods, run through an
/// [`Executor`] like any other action.
#[derive(Clone)]
pub struct Workflow {
    name: String,
    steps: Vec<WorkflowStep>,
    workflow_timeout: Option<u64>,
    executor: Executor,
}

impl Workflow {
    /// `name` must satisfy the action-name rules (letter first, then
    /// alphanumerics and underscores); it is validated when run.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            workflow_timeout: None,
            executor: Executor::default(),
        }
    }

    /// Overall deadline for the whole program (ms).
    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.workflow_timeout = Some(ms);
        self
    }

    /// Engine used for nested instructions. Defaults to a default-config
    /// executor.
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn step(mut self, instruction: Instruction) -> Self {
        self.steps.push(WorkflowStep::step(instruction));
        self
    }

    pub fn step_with(mut self, meta: StepMeta, instruction: Instruction) -> Self {
        self.steps.push(WorkflowStep::Step { meta, instruction });
        self
    }

    pub fn branch(
        mut self,
        condition: Condition,
        on_true: Vec<WorkflowStep>,
        on_false: Vec<WorkflowStep>,
    ) -> Self {
        self.steps.push(WorkflowStep::Branch {
            meta: StepMeta::new(),
            condition,
            on_true,
            on_false,
        });
        self
    }

    pub fn converge(mut self, meta: StepMeta, instruction: Instruction) -> Self {
        self.steps.push(WorkflowStep::Converge { meta, instruction });
        self
    }

    pub fn parallel(mut self, meta: StepMeta, instructions: Vec<Instruction>) -> Self {
        self.steps.push(WorkflowStep::Parallel { meta, instructions });
        self
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    // ------------------------------------------------------------------
    // Interpreter
    // ------------------------------------------------------------------

    /// Workflow deadline on entry: an inherited deadline wins, then the
    /// declared workflow timeout, then a timeout seeded in the context
    /// data.
    fn derive_deadline(&self, ctx: &RunContext) -> Option<Deadline> {
        if let Some(existing) = ctx.workflow_deadline {
            return Some(existing);
        }
        let ms = self.workflow_timeout.or_else(|| {
            ctx.get("workflow_timeout")
                .or_else(|| ctx.get("timeout"))
                .and_then(Value::as_u64)
        })?;
        Some(Deadline::from_timeout(ms))
    }

    fn run_sequence<'a>(
        &'a self,
        steps: &'a [WorkflowStep],
        running: &'a mut Params,
        results: &'a mut Params,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            for step in steps {
                if let Some(deadline) = ctx.workflow_deadline {
                    if deadline.is_elapsed() {
                        return Err(ExecError::timeout("workflow deadline exceeded")
                            .with_detail("workflow", self.name.as_str()));
                    }
                }

                match step {
                    WorkflowStep::Step { meta, instruction }
                    | WorkflowStep::Converge { meta, instruction } => {
                        let output = self.run_instruction(meta, instruction, running, ctx).await?;
                        params::merge(running, &output.result);
                        params::merge(results, &output.result);
                    }

                    WorkflowStep::Branch {
                        condition,
                        on_true,
                        on_false,
                        ..
                    } => {
                        let arm = if condition.resolve(running) {
                            on_true
                        } else {
                            on_false
                        };
                        self.run_sequence(arm, running, results, ctx).await?;
                    }

                    WorkflowStep::Parallel { meta, instructions } => {
                        let collected = self.run_parallel(meta, instructions, running, ctx).await?;
                        running.insert(PARALLEL_RESULTS_KEY.into(), collected.clone());
                        results.insert(PARALLEL_RESULTS_KEY.into(), collected);
                    }
                }
            }
            Ok(())
        })
    }

    /// Run one nested instruction under the workflow budget.
    async fn run_instruction(
        &self,
        meta: &StepMeta,
        instruction: &Instruction,
        running: &Params,
        ctx: &RunContext,
    ) -> ActionResult {
        let step_params = params::merged(running, &instruction.params);

        let mut step_ctx = ctx.clone();
        params::merge(&mut step_ctx.data, &instruction.context);

        let mut opts = instruction.opts.clone();
        if opts.timeout.is_none() {
            if let Some(ms) = meta.timeout {
                opts = opts.with_timeout_ms(ms);
            }
        }
        if let Some(deadline) = ctx.workflow_deadline {
            let remaining = deadline.remaining_ms();
            let effective = match opts.timeout_ms() {
                Some(requested) => requested.min(remaining),
                None => remaining,
            };
            opts = opts.with_timeout_ms(effective);
        }

        self.executor
            .run_prepared(instruction.action.clone(), step_params, step_ctx, opts)
            .await
    }

    /// Bounded-concurrent fan: scoped pool, semaphore cap, per-task
    /// budget clipped to the remaining workflow budget. Failures become
    /// `{"error": ...}` entries; nothing propagates as a panic.
    async fn run_parallel(
        &self,
        meta: &StepMeta,
        instructions: &[Instruction],
        running: &Params,
        ctx: &RunContext,
    ) -> Result<Value, ExecError> {
        let cap = meta
            .max_concurrency
            .or_else(|| ctx.get("max_concurrency").and_then(Value::as_u64).map(|n| n as usize))
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1);

        let per_task_ms = meta
            .parallel_timeout
            .or(meta.timeout)
            .or_else(|| ctx.get("parallel_timeout").and_then(Value::as_u64))
            .unwrap_or(self.executor.config().default_timeout);
        let per_task_ms = match ctx.workflow_deadline {
            Some(deadline) => per_task_ms.min(deadline.remaining_ms()),
            None => per_task_ms,
        };

        let pool = TaskPool::scoped(format!("{}_parallel", self.name));
        let _pool_guard = PoolGuard(pool.clone());
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(cap));

        debug!(
            workflow = %self.name,
            tasks = instructions.len(),
            cap,
            per_task_ms,
            "parallel step"
        );

        let mut handles = Vec::with_capacity(instructions.len());
        for (index, instruction) in instructions.iter().enumerate() {
            let executor = self.executor.clone();
            let action = instruction.action.clone();
            let step_params = params::merged(running, &instruction.params);
            let mut step_ctx = ctx.clone();
            params::merge(&mut step_ctx.data, &instruction.context);
            let opts = instruction
                .opts
                .clone()
                .with_timeout_ms(per_task_ms)
                .with_task_pool(pool.clone());
            let semaphore = std::sync::Arc::clone(&semaphore);

            handles.push(pool.spawn(async move {
                let _permit = semaphore.acquire().await;
                let entry = match executor
                    .run_prepared(action, step_params, step_ctx, opts)
                    .await
                {
                    Ok(output) => Value::Object(output.result),
                    Err(err) => serde_json::json!({"error": err.to_value()}),
                };
                (index, entry)
            }));
        }

        let mut collected: Vec<(usize, Value)> = if meta.ordered {
            // join_all preserves input order
            futures::future::join_all(handles)
                .await
                .into_iter()
                .enumerate()
                .map(|(index, joined)| match joined {
                    Ok(pair) => pair,
                    Err(err) => (
                        index,
                        serde_json::json!({"error": join_error_value(err)}),
                    ),
                })
                .collect()
        } else {
            let mut stream: FuturesUnordered<_> = handles.into_iter().collect();
            let mut out = Vec::new();
            while let Some(joined) = stream.next().await {
                match joined {
                    Ok(pair) => out.push(pair),
                    Err(err) => out.push((
                        usize::MAX,
                        serde_json::json!({"error": join_error_value(err)}),
                    )),
                }
            }
            out
        };

        if meta.ordered {
            collected.sort_by_key(|(index, _)| *index);
        }

        Ok(Value::Array(collected.into_iter().map(|(_, entry)| entry).collect()))
    }
}

/// Shuts the parallel pool down when the step ends, normally or not.
///
/// The children themselves hold pool clones (their nested runs spawn on
/// it), so the pool's refcount cannot reach zero while they are alive;
/// the guard is what actually cascades a dropped workflow into aborted
/// children. After a normal collection pass every task has finished and
/// the shutdown aborts nothing.
struct PoolGuard(TaskPool);

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

fn join_error_value(err: tokio::task::JoinError) -> Value {
    let reason = if err.is_cancelled() {
        "killed".to_string()
    } else {
        "panic".to_string()
    };
    ExecError::execution(format!("parallel task exited: {reason}"))
        .with_detail("reason", reason)
        .to_value()
}

#[async_trait]
impl Action for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Option<&str> {
        Some("workflow")
    }

    async fn execute(&self, params: Params, context: &RunContext) -> ActionResult {
        let mut ctx = context.clone();
        ctx.workflow_deadline = self.derive_deadline(&ctx);

        let mut running = params;
        let mut results = Params::new();
        self.run_sequence(&self.steps, &mut running, &mut results, &ctx)
            .await?;
        Ok(ActionOutput::new(results))
    }
}
