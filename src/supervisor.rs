//! # Task Pools
//!
//! A [`TaskPool`] supervises the short-lived tokio tasks the engine
//! spawns: every spawn registers an abort handle, completion deregisters
//! it, and `shutdown` aborts whatever is still in flight. Spawned tasks
//! only hold a weak reference back to the pool, so in-flight work never
//! keeps the pool alive: a scoped pool aborts its tasks the moment the
//! last [`TaskPool`] clone drops. Callers that hand pool clones to the
//! tasks themselves (the workflow parallel step does) shut the pool down
//! explicitly instead of relying on the refcount.
//!
//! Pools are multi-tenant: one lazily created global pool, plus named
//! pools registered per tenant in a process-wide registry. Resolution
//! order per call: explicit pool, then tenant name, then global.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use crate::error::ExecError;

/// Name of the implicit process-wide pool.
pub const GLOBAL_POOL: &str = "global";

static GLOBAL: Lazy<TaskPool> = Lazy::new(|| TaskPool::new(GLOBAL_POOL));
static REGISTRY: Lazy<DashMap<String, TaskPool>> = Lazy::new(DashMap::new);

// ============================================================================
// TASK POOL
// ============================================================================

struct PoolInner {
    name: Arc<str>,
    tasks: DashMap<u64, AbortHandle>,
    next_task: AtomicU64,
    closed: AtomicBool,
    abort_on_drop: bool,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if self.abort_on_drop {
            for entry in self.tasks.iter() {
                entry.value().abort();
            }
        }
    }
}

/// Supervisor of short-lived tasks. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

impl TaskPool {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::build(name, false)
    }

    /// Pool whose tasks are aborted when the last clone drops. Used for
    /// workflow-scoped parallel execution.
    pub fn scoped(name: impl Into<Arc<str>>) -> Self {
        Self::build(name, true)
    }

    fn build(name: impl Into<Arc<str>>, abort_on_drop: bool) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                tasks: DashMap::new(),
                next_task: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                abort_on_drop,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Spawn a task under this pool.
    ///
    /// The wrapper keeps only a [`Weak`] reference to the pool: a live
    /// task must not pin the pool's refcount, or a scoped pool could
    /// never observe its last clone dropping while work is in flight.
    pub fn spawn<T>(&self, fut: impl Future<Output = T> + Send + 'static) -> JoinHandle<T>
    where
        T: Send + 'static,
    {
        let id = self.inner.next_task.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let out = fut.await;
            // Pool may already be gone (and have aborted its registry).
            if let Some(inner) = weak.upgrade() {
                inner.tasks.remove(&id);
            }
            out
        });
        self.inner.tasks.insert(id, handle.abort_handle());
        // The task may have finished (and tried to deregister) before the
        // insert above landed; sweep the stale entry.
        if handle.is_finished() {
            self.inner.tasks.remove(&id);
        }
        handle
    }

    /// Number of live tasks.
    pub fn active(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Abort all live tasks and refuse future resolution.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let aborted = self.inner.tasks.len();
        for entry in self.inner.tasks.iter() {
            entry.value().abort();
        }
        self.inner.tasks.clear();
        if aborted > 0 {
            debug!(pool = %self.inner.name, aborted, "task pool shut down");
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.inner.name)
            .field("active", &self.active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The implicit process-wide pool.
pub fn global_pool() -> TaskPool {
    GLOBAL.clone()
}

/// Register (or fetch) a tenant pool.
pub fn register(tenant: impl Into<String>) -> TaskPool {
    let tenant = tenant.into();
    REGISTRY
        .entry(tenant.clone())
        .or_insert_with(|| TaskPool::new(tenant))
        .clone()
}

/// Drop a tenant pool from the registry, shutting it down.
pub fn unregister(tenant: &str) {
    if let Some((_, pool)) = REGISTRY.remove(tenant) {
        pool.shutdown();
    }
}

pub fn registered_pools() -> Vec<String> {
    REGISTRY.iter().map(|e| e.key().clone()).collect()
}

/// Resolve the pool for one call: explicit pool wins, then the tenant's
/// registered pool (Config error if absent or closed), then the global
/// pool.
pub fn resolve_pool(
    explicit: Option<&TaskPool>,
    tenant: Option<&str>,
) -> Result<TaskPool, ExecError> {
    if let Some(pool) = explicit {
        return Ok(pool.clone());
    }
    match tenant {
        None => Ok(global_pool()),
        Some(name) => {
            let pool = REGISTRY
                .get(name)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| {
                    ExecError::config(format!("task pool not running: {name}"))
                        .with_detail("tenant", name)
                })?;
            if pool.is_closed() {
                return Err(ExecError::config(format!("task pool not running: {name}"))
                    .with_detail("tenant", name));
            }
            Ok(pool)
        }
    }
}

/// Resolve the pool name only. Never checks liveness (early resolution).
pub fn pool_name(explicit: Option<&TaskPool>, tenant: Option<&str>) -> String {
    if let Some(pool) = explicit {
        return pool.name().to_string();
    }
    tenant.unwrap_or(GLOBAL_POOL).to_string()
}
