//! # Run Context
//!
//! Execution context threaded through every action run: caller-supplied
//! data plus the typed fields the engine itself maintains: injected action
//! metadata and the two deadline slots.
//!
//! Deadlines are monotonic instants ([`Deadline`] wraps
//! `std::time::Instant`), never wall time. Callers may seed them through
//! the data map with numeric `"exec_deadline"` / `"workflow_deadline"`
//! entries (milliseconds from now); normalization lifts those into the
//! typed slots and rejects any other `*_deadline` key rather than silently
//! ignoring it.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::ExecError;
use crate::params::{self, Params};

/// Data-map key lifted into [`RunContext::exec_deadline`].
pub const EXEC_DEADLINE_KEY: &str = "exec_deadline";

/// Data-map key lifted into [`RunContext::workflow_deadline`].
pub const WORKFLOW_DEADLINE_KEY: &str = "workflow_deadline";

// ============================================================================
// DEADLINE
// ============================================================================

/// Monotonic absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `ms` milliseconds from now.
    pub fn from_timeout(ms: u64) -> Self {
        Self {
            at: Instant::now() + Duration::from_millis(ms),
        }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left; zero once elapsed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining().as_millis() as u64
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The earlier of the two deadlines.
    pub fn earliest(self, other: Deadline) -> Deadline {
        if self.at <= other.at {
            self
        } else {
            other
        }
    }

    /// Earliest of two optional deadlines; `None` means unbounded.
    pub fn earliest_opt(a: Option<Deadline>, b: Option<Deadline>) -> Option<Deadline> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.earliest(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

// ============================================================================
// RUN CONTEXT
// ============================================================================

/// Context passed to an action's `execute` and hooks.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Caller-supplied context data (open map, passed through to actions)
    pub data: Params,

    /// Metadata of the action being run, injected by the executor
    pub action_metadata: Option<Value>,

    /// Budget for the current action run
    pub exec_deadline: Option<Deadline>,

    /// Budget for the enclosing workflow, if any
    pub workflow_deadline: Option<Deadline>,
}

impl RunContext {
    pub fn new(data: Params) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Normalize a caller-supplied context value (map or pair list) and
    /// lift deadline keys into the typed slots.
    pub fn from_value(value: Value) -> Result<Self, ExecError> {
        let data = params::normalize(value).map_err(|err| {
            ExecError::validation(format!("invalid context: {}", err.message()))
                .with_details(err.details().clone())
        })?;
        let mut ctx = Self::new(data);
        ctx.lift_deadlines()?;
        Ok(ctx)
    }

    /// Move `"exec_deadline"` / `"workflow_deadline"` entries out of the
    /// data map into the typed slots. Unknown `*_deadline` keys are a
    /// validation error.
    fn lift_deadlines(&mut self) -> Result<(), ExecError> {
        for key in [EXEC_DEADLINE_KEY, WORKFLOW_DEADLINE_KEY] {
            if let Some(value) = self.data.remove(key) {
                let ms = value.as_u64().ok_or_else(|| {
                    ExecError::validation(format!(
                        "context key {key} must be a non-negative integer (ms)"
                    ))
                    .with_detail("key", key)
                })?;
                let deadline = Deadline::from_timeout(ms);
                match key {
                    EXEC_DEADLINE_KEY => self.exec_deadline = Some(deadline),
                    _ => self.workflow_deadline = Some(deadline),
                }
            }
        }

        if let Some(stray) = self
            .data
            .keys()
            .find(|k| k.ends_with("_deadline") || k.as_str() == "deadline")
        {
            return Err(ExecError::validation(format!(
                "unknown deadline key in context: {stray}"
            ))
            .with_detail("key", stray.clone()));
        }

        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Tighten the exec deadline: the child budget is never later than the
    /// parent's.
    pub fn constrain_exec_deadline(&mut self, requested: Deadline) {
        self.exec_deadline = Some(match self.exec_deadline {
            Some(existing) => existing.earliest(requested),
            None => requested,
        });
    }

    /// Earliest applicable deadline for work started under this context.
    pub fn effective_deadline(&self) -> Option<Deadline> {
        Deadline::earliest_opt(self.exec_deadline, self.workflow_deadline)
    }
}
