//! # Task Lifecycle
//!
//! Runs one future as a supervised child task under a millisecond budget
//! and guarantees exactly one outcome to the caller.
//!
//! The child sends its value over a oneshot (the tagged result); the
//! `JoinHandle` is the monitor. The parent waits for whichever fires
//! first (result, join, or deadline) and then fully tears the child
//! down before returning:
//!
//! - clean join before a result: wait `down_grace` for the late value,
//!   then synthesize "task exited: normal"
//! - panicked or killed child: execution failure with the reason
//! - deadline: `shutdown_grace` for natural completion (the run is still
//!   reported as a timeout; partial output is discarded), then abort,
//!   then a bounded drain of the receiver and monitor
//!
//! No stale completion survives a call: receiver and handle are always
//! consumed or dropped before return.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::context::Deadline;
use crate::error::ExecError;
use crate::supervisor::TaskPool;

// ============================================================================
// OPTIONS
// ============================================================================

/// Per-call lifecycle tuning. The grace periods come from the engine
/// config, scoped per call site (exec / async / chain / compensation).
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub pool: TaskPool,
    pub down_grace: Duration,
    pub shutdown_grace: Duration,
    pub flush_timeout: Duration,
    pub max_flush_messages: Option<usize>,
    /// Used in error messages ("<label> timed out after Nms").
    pub label: String,
}

impl LifecycleOptions {
    pub fn new(pool: TaskPool, label: impl Into<String>) -> Self {
        Self {
            pool,
            down_grace: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(1_000),
            flush_timeout: Duration::ZERO,
            max_flush_messages: None,
            label: label.into(),
        }
    }

    pub fn with_down_grace(mut self, grace: Duration) -> Self {
        self.down_grace = grace;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_flush(mut self, timeout: Duration, max_messages: Option<usize>) -> Self {
        self.flush_timeout = timeout;
        self.max_flush_messages = max_messages;
        self
    }
}

// ============================================================================
// RUN
// ============================================================================

enum First<T> {
    Value(Result<T, oneshot::error::RecvError>),
    Joined(Result<(), JoinError>),
    Deadline,
}

/// Aborts the child when the waiting future is dropped.
///
/// Every normal return path has already consumed the child (joined or
/// aborted), so firing on a completed task is a no-op; the guard only
/// bites when the waiter itself is cancelled mid-wait, cascading the
/// kill downward instead of detaching the child.
struct CancelGuard(AbortHandle);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fut` as a supervised child with an optional budget. `None` means
/// unbounded (the `:infinity` case).
pub async fn run<T>(
    fut: impl Future<Output = T> + Send + 'static,
    timeout: Option<Duration>,
    opts: &LifecycleOptions,
) -> Result<T, ExecError>
where
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = opts.pool.spawn(async move {
        let _ = tx.send(fut.await);
    });
    await_outcome(rx, handle, timeout, opts).await
}

/// Wait on an already-spawned child. Shared by [`run`], the async handle
/// awaiter, and the chain awaiter.
pub(crate) async fn await_outcome<T>(
    mut rx: oneshot::Receiver<T>,
    mut handle: JoinHandle<()>,
    timeout: Option<Duration>,
    opts: &LifecycleOptions,
) -> Result<T, ExecError>
where
    T: Send + 'static,
{
    let deadline = timeout.map(Deadline::from_duration);
    let _cancel_guard = CancelGuard(handle.abort_handle());

    let first = {
        let wait = async {
            tokio::select! {
                value = &mut rx => First::Value(value),
                joined = &mut handle => First::Joined(joined),
            }
        };
        match deadline {
            Some(d) => match tokio::time::timeout(d.remaining(), wait).await {
                Ok(first) => first,
                Err(_) => First::Deadline,
            },
            None => wait.await,
        }
    };

    match first {
        // Result arrived; reap the (nearly finished) child before
        // returning so no monitor message outlives the call.
        First::Value(Ok(value)) => {
            if tokio::time::timeout(opts.down_grace, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
            Ok(value)
        }

        // Sender dropped without a value: the child died. Join to learn
        // the reason.
        First::Value(Err(_)) => {
            let joined = tokio::time::timeout(opts.down_grace, &mut handle).await;
            match joined {
                Ok(Ok(())) => Err(exited_normal(opts)),
                Ok(Err(join_err)) => Err(exited_abnormal(join_err, opts)),
                Err(_) => {
                    handle.abort();
                    let _ = handle.await;
                    Err(exited_normal(opts))
                }
            }
        }

        // Monitor fired first.
        First::Joined(joined) => match joined {
            // Clean exit: give a delayed result the down grace.
            Ok(()) => match tokio::time::timeout(opts.down_grace, rx).await {
                Ok(Ok(value)) => Ok(value),
                _ => Err(exited_normal(opts)),
            },
            Err(join_err) => Err(exited_abnormal(join_err, opts)),
        },

        // Budget exhausted: shutdown, then kill, then drain.
        First::Deadline => {
            let ms = timeout.map(|d| d.as_millis() as u64).unwrap_or(0);
            if tokio::time::timeout(opts.shutdown_grace, &mut handle).await.is_err() {
                handle.abort();
            }
            flush(rx, handle, opts).await;
            Err(ExecError::timeout(format!("{} timed out after {}ms", opts.label, ms))
                .with_detail("timeout", ms))
        }
    }
}

/// Bounded teardown after a kill: consume whatever the child still owes
/// us so nothing is left pending.
async fn flush<T>(rx: oneshot::Receiver<T>, handle: JoinHandle<()>, opts: &LifecycleOptions) {
    let mut budget = opts.max_flush_messages;
    let mut spend = || match &mut budget {
        None => true,
        Some(0) => false,
        Some(n) => {
            *n -= 1;
            true
        }
    };

    if spend() {
        let _ = tokio::time::timeout(opts.flush_timeout, rx).await;
    }
    if spend() {
        let _ = tokio::time::timeout(opts.flush_timeout, handle).await;
    }
}

fn exited_normal(opts: &LifecycleOptions) -> ExecError {
    ExecError::execution(format!("{}: task exited: normal", opts.label))
        .with_detail("reason", "normal")
}

fn exited_abnormal(join_err: JoinError, opts: &LifecycleOptions) -> ExecError {
    let reason = if join_err.is_cancelled() {
        "killed".to_string()
    } else {
        panic_message(join_err)
    };
    ExecError::execution(format!("{}: task exited: {}", opts.label, reason))
        .with_detail("reason", reason)
}

fn panic_message(join_err: JoinError) -> String {
    if !join_err.is_panic() {
        return "unknown".to_string();
    }
    let payload = join_err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
