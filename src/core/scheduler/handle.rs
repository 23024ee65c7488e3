use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::error::EngineError;
use crate::core::task::node::NodeOutcome;
use crate::core::task::{ProgressAggregator, SiblingFailure, Task, TaskListener, TaskState};

/// Final word on a submitted task: exactly one state and, unless it
/// succeeded, exactly one cause.
#[derive(Debug, Clone)]
pub struct TaskReport<R> {
    pub tag: String,
    pub state: TaskState,
    pub result: Option<R>,
    pub cause: Option<Arc<EngineError>>,
    /// Post-dependencies that did not succeed. Never affects `state`.
    pub post_failures: Vec<SiblingFailure>,
}

impl<R> TaskReport<R> {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// The first actionable cause, with dependency and retry wrappers removed.
    pub fn root_cause(&self) -> Option<&EngineError> {
        self.cause.as_deref().map(EngineError::root_cause)
    }

    pub fn into_result(self) -> Result<R, Arc<EngineError>> {
        match (self.result, self.cause) {
            (Some(value), None) => Ok(value),
            (_, Some(cause)) => Err(cause),
            (None, None) => Err(Arc::new(EngineError::ResultUnavailable { tag: self.tag })),
        }
    }
}

type CompleteCallback<R> = Box<dyn FnOnce(&TaskReport<R>) + Send>;

struct CompletionState<R> {
    report: Option<TaskReport<R>>,
    callbacks: Vec<CompleteCallback<R>>,
}

/// Shared between a handle and the driver that fills it in.
pub(crate) struct Completion<R> {
    state: Mutex<CompletionState<R>>,
    done: watch::Sender<bool>,
}

impl<R> Completion<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(CompletionState {
                report: None,
                callbacks: Vec::new(),
            }),
            done,
        })
    }

    pub fn finish(&self, task: &Task<R>, outcome: NodeOutcome) {
        let report = TaskReport {
            tag: task.tag().to_string(),
            state: outcome.state,
            result: task.result(),
            cause: outcome.cause,
            post_failures: outcome.post_failures,
        };
        let callbacks = {
            let mut state = self.state.lock();
            state.report = Some(report.clone());
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(&report);
        }
        self.done.send_replace(true);
    }

    fn report(&self) -> Option<TaskReport<R>> {
        self.state.lock().report.clone()
    }
}

struct ProgressForwarder<F> {
    aggregator: Weak<ProgressAggregator>,
    callback: F,
}

impl<F> TaskListener for ProgressForwarder<F>
where
    F: Fn(f64) + Send + Sync,
{
    fn on_state(&self, _tag: &str, _state: TaskState) {
        self.forward();
    }

    fn on_progress(&self, _tag: &str, _progress: f64) {
        self.forward();
    }
}

impl<F> ProgressForwarder<F>
where
    F: Fn(f64) + Send + Sync,
{
    fn forward(&self) {
        if let Some(aggregator) = self.aggregator.upgrade() {
            (self.callback)(aggregator.value());
        }
    }
}

/// Caller-side view of a submitted task.
pub struct TaskHandle<R> {
    task: Task<R>,
    aggregator: Arc<ProgressAggregator>,
    completion: Arc<Completion<R>>,
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("task", &self.task).finish_non_exhaustive()
    }
}

impl<R> TaskHandle<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        task: Task<R>,
        aggregator: Arc<ProgressAggregator>,
        completion: Arc<Completion<R>>,
    ) -> Self {
        Self {
            task,
            aggregator,
            completion,
        }
    }

    pub fn task(&self) -> &Task<R> {
        &self.task
    }

    /// Called with the aggregated progress whenever any task in the graph
    /// moves. Runs on worker threads; must not block.
    pub fn on_progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let forwarder: Arc<dyn TaskListener> = Arc::new(ProgressForwarder {
            aggregator: Arc::downgrade(&self.aggregator),
            callback,
        });
        for node in self.aggregator.nodes() {
            node.add_listener(Arc::clone(&forwarder));
        }
        self
    }

    /// Called once with the final report. Runs immediately when the task
    /// already finished.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&TaskReport<R>) + Send + 'static,
    {
        let ready = {
            let mut state = self.completion.state.lock();
            match &state.report {
                Some(report) => Some(report.clone()),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return self;
                }
            }
        };
        if let Some(report) = ready {
            callback(&report);
        }
        self
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn progress(&self) -> f64 {
        self.aggregator.value()
    }

    pub fn is_cancelled(&self) -> bool {
        self.aggregator.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        *self.completion.done.borrow()
    }

    /// Barrier: resolves with the final report.
    pub async fn wait(&self) -> TaskReport<R> {
        let mut done = self.completion.done.subscribe();
        // The sender lives in `self.completion`, so the channel cannot close.
        let _ = done.wait_for(|finished| *finished).await;
        match self.completion.report() {
            Some(report) => report,
            None => TaskReport {
                tag: self.task.tag().to_string(),
                state: self.task.state(),
                result: None,
                cause: Some(Arc::new(EngineError::ResultUnavailable {
                    tag: self.task.tag().to_string(),
                })),
                post_failures: Vec::new(),
            },
        }
    }
}
