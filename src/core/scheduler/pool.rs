use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::core::error::{EngineError, EngineResult};

/// Bounded set of worker slots shared by every scheduled task body.
///
/// Orchestration (waiting on dependencies) is free; only a running body holds
/// a slot. Waiting bodies are admitted in FIFO order as slots free up.
#[derive(Debug)]
pub struct ExecutionPool {
    capacity: usize,
    slots: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    runtime: Option<Handle>,
}

/// A held worker slot. Returned to the pool on drop.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ExecutionPool {
    /// Pool bound to the runtime it is created in, if any.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, Handle::try_current().ok())
    }

    /// Pool whose work always runs on `runtime`, so it can be fed from
    /// threads that are not part of any runtime.
    pub fn with_runtime(capacity: usize, runtime: Handle) -> Self {
        Self::build(capacity, Some(runtime))
    }

    fn build(capacity: usize, runtime: Option<Handle>) -> Self {
        let capacity = capacity.max(1);
        info!("Creating execution pool with {} worker slots", capacity);

        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            runtime,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bodies currently holding a slot.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously held slots seen so far.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits for a free slot. `None` once the pool is shut down, including
    /// for callers that were still queued.
    pub async fn acquire(&self) -> Option<PoolSlot> {
        if self.is_shut_down() {
            return None;
        }
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        let now = self.running.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Some(PoolSlot {
            _permit: permit,
            running: Arc::clone(&self.running),
        })
    }

    /// The runtime work is spawned on: the bound one, else the caller's.
    pub(crate) fn runtime(&self) -> EngineResult<Handle> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| {
                EngineError::Configuration(
                    "execution pool has no runtime; create it with `with_runtime` or inside one".into(),
                )
            })
    }

    /// Starts `future` on a worker and tracks it for shutdown.
    pub fn spawn<T>(&self, future: BoxFuture<'static, T>) -> EngineResult<JoinHandle<T>>
    where
        T: Send + 'static,
    {
        let runtime = self.runtime()?;
        Ok(self.tracker.spawn_on(future, &runtime))
    }

    /// Runs a cohort concurrently and waits until every member finished.
    ///
    /// Members are started immediately; only completion is awaited. Results
    /// come back in completion order, each paired with its index in the
    /// cohort.
    pub async fn submit<T>(
        &self,
        cohort: Vec<BoxFuture<'static, T>>,
    ) -> Vec<(usize, Result<T, JoinError>)>
    where
        T: Send + 'static,
    {
        let size = cohort.len();
        let runtime = self.runtime().ok();
        let mut pending: FuturesUnordered<BoxFuture<'static, (usize, Result<T, JoinError>)>> = cohort
            .into_iter()
            .enumerate()
            .map(|(index, future)| match &runtime {
                Some(runtime) => {
                    let handle = self.tracker.spawn_on(future, runtime);
                    Box::pin(async move { (index, handle.await) }) as BoxFuture<'static, _>
                }
                // Polled in place by the awaiting caller.
                None => Box::pin(async move { (index, Ok(future.await)) }) as BoxFuture<'static, _>,
            })
            .collect();

        let mut finished = Vec::with_capacity(size);
        while let Some(done) = pending.next().await {
            finished.push(done);
        }
        finished
    }

    /// Aborts queued bodies, asks running ones to cancel, and returns once
    /// every tracked future has finished.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            self.tracker.wait().await;
            return;
        }
        info!(
            "Shutting down execution pool ({} running)",
            self.running()
        );
        self.shutdown.cancel();
        self.slots.close();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Execution pool drained");
    }
}
