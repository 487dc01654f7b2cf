//! Bounded worker pools for phase workers.
//!
//! A `WorkerPool` caps how many units of one kind run at once. Each spawned
//! unit waits for a slot, runs on the tokio runtime, and releases the slot
//! when it finishes. Waiting for a slot observes the task's cancellation
//! token so a stopped task never starts queued work.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::PoolSettings;
use crate::error::{Error, Result};

struct PoolInner {
    name: String,
    /// None for coordinator pools that never queue.
    slots: Option<Arc<Semaphore>>,
    width: Option<usize>,
    active: AtomicUsize,
    peak: AtomicUsize,
    spawned: AtomicUsize,
}

/// Decrements the active count when a unit finishes, even on panic.
struct ActiveGuard(Arc<PoolInner>);

impl ActiveGuard {
    fn enter(inner: Arc<PoolInner>) -> Self {
        let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A named pool with a fixed number of slots.
///
/// Cloning is cheap; clones share the same slots.
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::new("assembly", 3);
/// let cancel = CancellationToken::new();
/// let handle = pool.spawn(cancel.clone(), async { Ok(42) });
/// assert_eq!(handle.await.unwrap().unwrap(), 42);
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool running at most `width` units at once. A width of zero
    /// is treated as one.
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        let width = width.max(1);
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                slots: Some(Arc::new(Semaphore::new(width))),
                width: Some(width),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    /// A pool without a slot limit, for coordinators that only wait on other
    /// pools. Coordinators holding bounded slots while waiting for children
    /// on the same pool could starve them.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                slots: None,
                width: None,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Maximum concurrent units, None when unbounded.
    pub fn width(&self) -> Option<usize> {
        self.inner.width
    }

    /// Units currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of units that ever ran at once.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Units spawned over the pool's lifetime.
    pub fn spawned_count(&self) -> usize {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    pub fn has_capacity(&self) -> bool {
        match &self.inner.slots {
            Some(slots) => slots.available_permits() > 0,
            None => true,
        }
    }

    /// Spawn a unit. It waits for a free slot first; if `cancel` fires while
    /// waiting, the unit never runs and resolves to [`Error::Cancelled`].
    pub fn spawn<F, T>(&self, cancel: CancellationToken, fut: F) -> JoinHandle<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        inner.spawned.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let _permit = match &inner.slots {
                Some(slots) => {
                    let slots = Arc::clone(slots);
                    let permit = tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        permit = slots.acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
                    };
                    Some(permit)
                }
                None => None,
            };
            let _active = ActiveGuard::enter(Arc::clone(&inner));
            trace!(
                pool = %inner.name,
                active = inner.active.load(Ordering::SeqCst),
                "slot acquired"
            );
            fut.await
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("width", &self.inner.width)
            .field("active", &self.active_count())
            .finish()
    }
}

/// The pools one task run uses.
#[derive(Clone, Debug)]
pub struct Pools {
    /// Network-bound phase workers.
    pub general: WorkerPool,
    /// Montage and finalize, which are CPU/GPU heavy.
    pub assembly: WorkerPool,
    /// Branch coordinators of the asset phase.
    pub coordinators: WorkerPool,
}

impl Pools {
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self {
            general: WorkerPool::new("general", settings.general),
            assembly: WorkerPool::new("assembly", settings.assembly),
            coordinators: WorkerPool::unbounded("coordinators"),
        }
    }
}

/// Run `f` over `items` with at most `width` in flight and return the
/// results in input order, whatever order they complete in.
///
/// The first error is returned once seen; calls still in flight are dropped.
pub async fn run_ordered<I, T, F, Fut>(width: usize, items: Vec<I>, f: F) -> Result<Vec<T>>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total = items.len();
    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();

    let mut results = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let fut = f(index, item);
        async move { (index, fut.await) }
    }))
    .buffer_unordered(width.max(1));

    while let Some((index, result)) = results.next().await {
        slots[index] = Some(result?);
    }

    Ok(slots.into_iter().flatten().collect())
}
