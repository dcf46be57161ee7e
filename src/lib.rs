//! # Acta
//!
//! Composable action execution engine.
//!
//! Acta runs user-defined units of work ("actions") with schema
//! validation, timeouts, retries with exponential backoff, Saga-style
//! compensation, and sync / async execution, and composes them into
//! sequential chains, DAG-based plans, and step-based workflows with
//! branching and bounded parallelism.
//!
//! ## Overview
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`action`] | The `Action` trait: metadata, schemas, hooks, compensation |
//! | [`exec`] | Orchestrator: normalize → validate → timed run → retry → compensation |
//! | [`lifecycle`] | Supervised timeout-bounded task execution |
//! | [`supervisor`] | Task pools and per-tenant routing |
//! | [`handle`] | Owner-bound handles for async runs |
//! | [`chain`] | Sequential composition with accumulation |
//! | [`workflow`] | Step interpreter: step, branch, converge, parallel |
//! | [`plan`] | DAG of instructions layered into execution phases |
//! | [`instruction`] | Canonical work orders and shorthand normalization |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use acta::{Action, ActionOutput, ActionResult, EngineConfig, Executor, RunOptions};
//! use acta::{Params, RunContext};
//! use async_trait::async_trait;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Add;
//!
//! #[async_trait]
//! impl Action for Add {
//!     fn name(&self) -> &str {
//!         "add_value"
//!     }
//!
//!     async fn execute(&self, params: Params, _ctx: &RunContext) -> ActionResult {
//!         let value = params["value"].as_i64().unwrap_or(0);
//!         Ok(ActionOutput::from_json(json!({"value": value + 1})))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), acta::ExecError> {
//! let executor = Executor::new(EngineConfig::default());
//! let out = executor
//!     .run(Arc::new(Add), json!({"value": 5}), json!({}), RunOptions::new())
//!     .await?;
//! assert_eq!(out.result["value"], json!(6));
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! Errors are values ([`ExecError`]); nothing escapes as a panic and no
//! caller task is ever killed by a failing action. The retry loop, the
//! compensation block, and chain accumulation are the only local
//! recovery points; everything else surfaces to the caller.

pub mod action;
pub mod chain;
pub mod compensation;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod handle;
pub mod instruction;
pub mod lifecycle;
pub mod params;
pub mod plan;
pub mod retry;
pub mod schema;
pub mod supervisor;
pub mod telemetry;
pub mod workflow;

pub use action::{Action, ActionOutput, ActionRef, ActionResult, CompensationSpec};
pub use chain::{ChainHandle, ChainItem, ChainOptions, ChainOutcome, ChainResult};
pub use config::EngineConfig;
pub use context::{Deadline, RunContext};
pub use error::{Details, ErrorKind, ExecError};
pub use exec::{ActionHandle, ExecResult, Executor, RunOptions, Timeout};
pub use handle::AsyncHandle;
pub use instruction::{Instruction, InstructionInput};
pub use params::Params;
pub use plan::{Plan, PlanStep};
pub use schema::{Field, FieldKind, Schema};
pub use supervisor::TaskPool;
pub use telemetry::{LogLevel, TelemetryMode};
pub use workflow::{Condition, StepMeta, Workflow, WorkflowStep};
