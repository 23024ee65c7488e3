use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::node::TaskNode;
use crate::core::error::{EngineError, EngineResult};

/// Handle a running body uses to observe cancellation and report progress.
#[derive(Clone)]
pub struct TaskContext {
    node: Arc<TaskNode>,
    pool_token: CancellationToken,
    throttle: Arc<Throttle>,
}

struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    fn should_notify(&self, value: f64) -> bool {
        if self.interval.is_zero() || value >= 1.0 {
            return true;
        }
        let mut last = self.last.lock();
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl TaskContext {
    pub(crate) fn new(
        node: Arc<TaskNode>,
        pool_token: CancellationToken,
        progress_interval: Duration,
    ) -> Self {
        Self {
            node,
            pool_token,
            throttle: Arc::new(Throttle {
                interval: progress_interval,
                last: Mutex::new(None),
            }),
        }
    }

    pub fn tag(&self) -> &str {
        self.node.tag()
    }

    pub(crate) fn node(&self) -> &Arc<TaskNode> {
        &self.node
    }

    /// True once the task, one of its ancestors, or the pool was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled() || self.pool_token.is_cancelled()
    }

    /// Yield point for long loops: errors with `Cancelled` once cancellation
    /// was requested.
    pub fn checkpoint(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled {
                tag: self.tag().to_string(),
            });
        }
        Ok(())
    }

    /// Resolves when cancellation is requested. Meant for `tokio::select!`
    /// around blocking reads.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.node.token().cancelled() => {}
            _ = self.pool_token.cancelled() => {}
        }
    }

    /// Progress as `done / total`. A zero total is ignored.
    pub fn set_progress(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        self.set_progress_ratio(done as f64 / total as f64);
    }

    pub fn set_progress_ratio(&self, value: f64) {
        let notify = self.throttle.should_notify(value);
        self.node.advance_progress(value, notify);
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("tag", &self.tag())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
