use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::channel::ResultChannel;
use super::context::TaskContext;
use super::graph;
use super::node::{Composed, ErasedBody, TaskNode};
use super::state::{TaskListener, TaskState};
use crate::core::error::{EngineError, EngineResult};

/// The work a task performs once all of its pre-dependencies succeeded.
///
/// Called exactly once, on a pool worker. Long loops should call
/// [`TaskContext::checkpoint`] so cancellation is observed promptly.
#[async_trait]
pub trait TaskBody<R>: Send + 'static {
    async fn execute(self: Box<Self>, cx: TaskContext) -> EngineResult<R>;
}

/// Adapts an async closure into a [`TaskBody`].
pub struct FnBody<F>(F);

#[async_trait]
impl<R, F, Fut> TaskBody<R> for FnBody<F>
where
    R: Send + 'static,
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = EngineResult<R>> + Send + 'static,
{
    async fn execute(self: Box<Self>, cx: TaskContext) -> EngineResult<R> {
        (self.0)(cx).await
    }
}

struct TypedBody<R> {
    body: Box<dyn TaskBody<R>>,
    channel: ResultChannel<R>,
}

#[async_trait]
impl<R> ErasedBody for TypedBody<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn run(self: Box<Self>, cx: TaskContext) -> EngineResult<()> {
        let TypedBody { body, channel } = *self;
        let value = body.execute(cx).await?;
        channel.publish(value)
    }
}

/// Builds a graph from the previous step's result and leaves it to the
/// scheduler, which runs it and publishes its result as this step's own.
struct ComposeBody<R, U, F> {
    input: ResultChannel<R>,
    build: F,
    output: ResultChannel<U>,
}

#[async_trait]
impl<R, U, F> ErasedBody for ComposeBody<R, U, F>
where
    R: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: FnOnce(R, TaskContext) -> EngineResult<Task<U>> + Send + 'static,
{
    async fn run(self: Box<Self>, cx: TaskContext) -> EngineResult<()> {
        let ComposeBody {
            input,
            build,
            output,
        } = *self;
        let inner = build(input.read()?, cx.clone())?;

        let outer = cx.node();
        if TaskNode::same(&inner.node, outer) || graph::reaches(&inner.node, outer) {
            return Err(EngineError::Configuration(format!(
                "'{}' composed a graph that depends on itself",
                outer.tag()
            )));
        }
        let produced = inner.channel();
        outer.set_composed(Composed {
            inner: Arc::clone(&inner.node),
            publish: Box::new(move || output.publish(produced.read()?)),
        });
        Ok(())
    }
}

/// A unit of asynchronous work producing an `R`.
///
/// `Task` is a cheap handle: clones refer to the same graph node, so a task
/// can be shared as a dependency of several others and still runs once.
pub struct Task<R> {
    node: Arc<TaskNode>,
    channel: ResultChannel<R>,
}

impl<R> Clone for Task<R> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            channel: self.channel.clone(),
        }
    }
}

impl<R> std::fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.node.fmt(f)
    }
}

impl<R> Task<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn from_body(tag: impl Into<String>, body: impl TaskBody<R>) -> Self {
        let tag = tag.into();
        let channel = ResultChannel::new(&tag);
        let erased = TypedBody {
            body: Box::new(body),
            channel: channel.clone(),
        };
        Self {
            node: TaskNode::new(tag, Box::new(erased)),
            channel,
        }
    }

    pub fn supply<F, Fut>(tag: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<R>> + Send + 'static,
    {
        Self::from_body(tag, FnBody(f))
    }

    pub fn tag(&self) -> &str {
        self.node.tag()
    }

    pub fn state(&self) -> TaskState {
        self.node.state()
    }

    /// 0 while pending, non-decreasing while running, 1 on success, and the
    /// last observed value after a failure or abort.
    pub fn progress(&self) -> f64 {
        self.node.progress()
    }

    pub fn cause(&self) -> Option<Arc<EngineError>> {
        self.node.cause()
    }

    /// The published result, once the task succeeded.
    pub fn result(&self) -> Option<R> {
        self.channel.read().ok()
    }

    pub fn channel(&self) -> ResultChannel<R> {
        self.channel.clone()
    }

    pub fn with_weight(self, weight: f64) -> Self {
        self.node.set_weight(weight);
        self
    }

    /// Keeps lifecycle messages of bookkeeping tasks out of the log.
    pub fn quiet(self) -> Self {
        self.node.set_quiet();
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.node.add_listener(listener);
    }

    /// `dep` must finish successfully before this task's body runs.
    pub fn add_pre_dependency<D>(&self, dep: &Task<D>) -> EngineResult<()> {
        self.check_edge(&dep.node)?;
        self.node.push_pre(Arc::clone(&dep.node));
        Ok(())
    }

    /// `dep` runs after this task succeeded. Its failure is reported but does
    /// not fail this task.
    pub fn add_post_dependency<D>(&self, dep: &Task<D>) -> EngineResult<()> {
        self.check_edge(&dep.node)?;
        self.node.push_post(Arc::clone(&dep.node));
        Ok(())
    }

    /// Requests cancellation of this task and everything it depends on.
    pub fn cancel(&self) {
        graph::cancel_subtree(&self.node);
    }

    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }

    /// Next step of a chain: runs after this task and receives its result.
    pub fn then<U, F, Fut>(&self, tag: impl Into<String>, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(R, TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<U>> + Send + 'static,
    {
        let input = self.channel();
        let next = Task::supply(tag, move |cx| async move {
            let previous = input.read()?;
            f(previous, cx).await
        });
        // A fresh node has no edges, so this cannot close a cycle.
        next.node.push_pre(Arc::clone(&self.node));
        next
    }

    /// Next step of a chain whose work is itself a task graph.
    ///
    /// `f` receives this task's result and returns the task to run. That
    /// task and its dependencies start once `f` returned, without holding
    /// the worker slot `f` ran on, and their result becomes the result of
    /// the returned step. A failure inside fails the step with
    /// `DependencyFailed`.
    pub fn then_compose<U, F>(&self, tag: impl Into<String>, f: F) -> Task<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(R, TaskContext) -> EngineResult<Task<U>> + Send + 'static,
    {
        let tag = tag.into();
        let output = ResultChannel::new(&tag);
        let body = ComposeBody {
            input: self.channel(),
            build: f,
            output: output.clone(),
        };
        let next = Task {
            node: TaskNode::new(tag, Box::new(body)),
            channel: output,
        };
        next.node.push_pre(Arc::clone(&self.node));
        next
    }

    pub(crate) fn node(&self) -> &Arc<TaskNode> {
        &self.node
    }

    fn check_edge(&self, dep: &Arc<TaskNode>) -> EngineResult<()> {
        if self.node.is_sealed() {
            return Err(EngineError::Configuration(format!(
                "cannot add a dependency to '{}' after it was submitted",
                self.tag()
            )));
        }
        if TaskNode::same(&self.node, dep) || graph::reaches(dep, &self.node) {
            return Err(EngineError::Configuration(format!(
                "dependency '{}' -> '{}' would create a cycle",
                self.tag(),
                dep.tag()
            )));
        }
        Ok(())
    }
}

impl<R> Task<Vec<R>>
where
    R: Clone + Send + Sync + 'static,
{
    /// Runs every task of the cohort as pre-dependencies and collects their
    /// results in the order given.
    pub fn all_of(tag: impl Into<String>, tasks: Vec<Task<R>>) -> Self {
        let channels: Vec<ResultChannel<R>> = tasks.iter().map(Task::channel).collect();
        let joined = Task::supply(tag, move |_cx| async move {
            channels.iter().map(ResultChannel::read).collect()
        })
        .quiet();
        for task in &tasks {
            joined.node.push_pre(Arc::clone(&task.node));
        }
        joined
    }
}
