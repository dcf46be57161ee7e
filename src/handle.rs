//! # Async Handles
//!
//! Owner-bound handle for an in-flight async run. Created by
//! `Executor::run_async` (or an async chain); consumed by await or
//! cancel. The owner is recorded by value (the tokio task id of the
//! creator) so the handle never reaches back into the owning task.
//!
//! Only the owning task may await; anyone else gets InvalidInput. A
//! handle can only be produced by the engine, so a malformed handle is
//! unrepresentable.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ExecError;
use crate::supervisor::TaskPool;

/// In-flight async run delivering a payload of type `P` (a single action
/// result, a chain outcome). See the module docs for the ownership rule.
pub struct AsyncHandle<P> {
    id: Uuid,
    owner: Option<tokio::task::Id>,
    rx: oneshot::Receiver<P>,
    join: JoinHandle<()>,
    pool: TaskPool,
}

impl<P> AsyncHandle<P>
where
    P: Send + 'static,
{
    /// Spawn the producing future on `pool` and bind the handle to the
    /// calling task.
    pub(crate) fn spawn<F, Fut>(pool: &TaskPool, producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = P> + Send,
    {
        let (tx, rx) = oneshot::channel();
        let join = pool.spawn(async move {
            let _ = tx.send(producer().await);
        });
        Self {
            id: Uuid::new_v4(),
            owner: tokio::task::try_id(),
            rx,
            join,
            pool: pool.clone(),
        }
    }

    /// Unique token for this run.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the underlying task already finished (result may still be
    /// waiting to be consumed).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub(crate) fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Enforce owner binding. Outside any task context the check cannot
    /// identify a caller and passes through.
    pub(crate) fn check_owner(&self) -> Result<(), ExecError> {
        match (self.owner, tokio::task::try_id()) {
            (Some(owner), Some(current)) if owner != current => Err(ExecError::invalid_input(
                "only the owning task may await this handle",
            )
            .with_detail("handle", self.id.to_string())),
            _ => Ok(()),
        }
    }

    pub(crate) fn into_parts(self) -> (oneshot::Receiver<P>, JoinHandle<()>) {
        (self.rx, self.join)
    }

    /// Cancel: give the task a shutdown grace, then abort, then drain
    /// the pending result and monitor within the flush budget. Succeeds
    /// whether or not the run already completed.
    pub(crate) async fn cancel(
        self,
        shutdown_grace: Duration,
        flush_timeout: Duration,
        max_flush_messages: Option<usize>,
    ) {
        let (rx, mut join) = self.into_parts();
        if tokio::time::timeout(shutdown_grace, &mut join).await.is_err() {
            join.abort();
        }

        let mut budget = max_flush_messages;
        let mut spend = || match &mut budget {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        };
        if spend() {
            let _ = tokio::time::timeout(flush_timeout, rx).await;
        }
        if spend() {
            let _ = tokio::time::timeout(flush_timeout, join).await;
        }
    }
}

impl<P> std::fmt::Debug for AsyncHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("id", &self.id)
            .field("pool", &self.pool.name())
            .field("finished", &self.join.is_finished())
            .finish()
    }
}
