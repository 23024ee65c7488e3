use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::context::TaskContext;
use super::state::{TaskListener, TaskState};
use crate::core::error::{EngineError, EngineResult};

/// Type-erased task body, consumed by its single execution.
#[async_trait]
pub(crate) trait ErasedBody: Send {
    async fn run(self: Box<Self>, cx: TaskContext) -> EngineResult<()>;
}

/// Graph a body handed back to the scheduler. It runs after the body, and
/// `publish` forwards its result once it succeeded.
pub(crate) struct Composed {
    pub inner: Arc<TaskNode>,
    pub publish: Box<dyn FnOnce() -> EngineResult<()> + Send>,
}

/// A post-dependency that did not succeed. Reported next to the parent's
/// own outcome without changing it.
#[derive(Debug, Clone)]
pub struct SiblingFailure {
    pub tag: String,
    pub state: TaskState,
    pub cause: Arc<EngineError>,
}

/// Terminal record of one node, shared by every graph that reaches it.
#[derive(Debug, Clone)]
pub(crate) struct NodeOutcome {
    pub state: TaskState,
    pub cause: Option<Arc<EngineError>>,
    pub post_failures: Vec<SiblingFailure>,
}

/// Graph vertex behind every `Task<R>`.
pub(crate) struct TaskNode {
    tag: String,
    weight: Mutex<f64>,
    quiet: AtomicBool,
    state: Mutex<TaskState>,
    progress: AtomicU64,
    cause: OnceLock<Arc<EngineError>>,
    pre: Mutex<Vec<Arc<TaskNode>>>,
    post: Mutex<Vec<Arc<TaskNode>>>,
    cancel: CancellationToken,
    listeners: Mutex<Vec<Arc<dyn TaskListener>>>,
    body: Mutex<Option<Box<dyn ErasedBody>>>,
    composed: Mutex<Option<Composed>>,
    sealed: AtomicBool,
    submitted: AtomicBool,
    pub(crate) outcome: OnceCell<NodeOutcome>,
}

impl TaskNode {
    pub fn new(tag: String, body: Box<dyn ErasedBody>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            weight: Mutex::new(1.0),
            quiet: AtomicBool::new(false),
            state: Mutex::new(TaskState::Pending),
            progress: AtomicU64::new(0f64.to_bits()),
            cause: OnceLock::new(),
            pre: Mutex::new(Vec::new()),
            post: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
            body: Mutex::new(Some(body)),
            composed: Mutex::new(None),
            sealed: AtomicBool::new(false),
            submitted: AtomicBool::new(false),
            outcome: OnceCell::new(),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn same(a: &Arc<TaskNode>, b: &Arc<TaskNode>) -> bool {
        Arc::ptr_eq(a, b)
    }

    pub fn key(node: &Arc<TaskNode>) -> usize {
        Arc::as_ptr(node) as usize
    }

    // ── Attributes ──────────────────────────────────────

    pub fn weight(&self) -> f64 {
        *self.weight.lock()
    }

    pub fn set_weight(&self, weight: f64) {
        *self.weight.lock() = weight.max(0.0);
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    pub fn set_quiet(&self) {
        self.quiet.store(true, Ordering::Relaxed);
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    pub fn cause(&self) -> Option<Arc<EngineError>> {
        self.cause.get().cloned()
    }

    pub fn pre_dependencies(&self) -> Vec<Arc<TaskNode>> {
        self.pre.lock().clone()
    }

    pub fn post_dependencies(&self) -> Vec<Arc<TaskNode>> {
        self.post.lock().clone()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.listeners.lock().push(listener);
    }

    // ── Edges ───────────────────────────────────────────

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Marks the node as a submission root. Returns false when it already was.
    pub fn mark_submitted(&self) -> bool {
        !self.submitted.swap(true, Ordering::AcqRel)
    }

    pub fn push_pre(&self, dep: Arc<TaskNode>) {
        let mut pre = self.pre.lock();
        if !pre.iter().any(|existing| TaskNode::same(existing, &dep)) {
            pre.push(dep);
        }
    }

    pub fn push_post(&self, dep: Arc<TaskNode>) {
        let mut post = self.post.lock();
        if !post.iter().any(|existing| TaskNode::same(existing, &dep)) {
            post.push(dep);
        }
    }

    // ── Transitions ─────────────────────────────────────

    pub fn take_body(&self) -> Option<Box<dyn ErasedBody>> {
        self.body.lock().take()
    }

    pub fn set_composed(&self, composed: Composed) {
        *self.composed.lock() = Some(composed);
    }

    pub fn take_composed(&self) -> Option<Composed> {
        self.composed.lock().take()
    }

    pub fn transition(&self, next: TaskState) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = next;
        }
        self.notify_state(next);
    }

    pub fn succeed(&self) {
        self.progress.store(1f64.to_bits(), Ordering::Release);
        self.notify_progress(1.0);
        self.transition(TaskState::Succeeded);
    }

    pub fn terminate(&self, state: TaskState, cause: Arc<EngineError>) {
        let _ = self.cause.set(cause);
        self.transition(state);
    }

    /// Raises the stored progress; values below the current one are ignored.
    /// Returns true when the value moved.
    pub fn advance_progress(&self, value: f64, notify: bool) -> bool {
        if !value.is_finite() || self.state() != TaskState::Running {
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        let mut current = self.progress.load(Ordering::Acquire);
        loop {
            if value <= f64::from_bits(current) {
                return false;
            }
            match self.progress.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if notify {
            self.notify_progress(value);
        }
        true
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn TaskListener>> {
        self.listeners.lock().clone()
    }

    fn notify_state(&self, state: TaskState) {
        for listener in self.snapshot_listeners() {
            listener.on_state(&self.tag, state);
        }
    }

    pub fn notify_progress(&self, value: f64) {
        for listener in self.snapshot_listeners() {
            listener.on_progress(&self.tag, value);
        }
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("tag", &self.tag)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}
