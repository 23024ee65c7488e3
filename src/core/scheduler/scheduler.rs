use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinError;
use tracing::{debug, warn};

use super::handle::{Completion, TaskHandle, TaskReport};
use super::pool::ExecutionPool;
use crate::core::error::{EngineError, EngineResult};
use crate::core::task::graph;
use crate::core::task::node::{Composed, NodeOutcome, TaskNode};
use crate::core::task::{ProgressAggregator, SiblingFailure, Task, TaskContext, TaskState};

/// Resolves and runs task graphs on an [`ExecutionPool`].
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<ExecutionPool>,
    progress_interval: Duration,
}

impl Scheduler {
    pub fn new(pool: Arc<ExecutionPool>) -> Self {
        Self {
            pool,
            progress_interval: Duration::ZERO,
        }
    }

    /// Minimum delay between progress notifications of a single task.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn pool(&self) -> &Arc<ExecutionPool> {
        &self.pool
    }

    /// Starts running `task` and its graph in the background.
    ///
    /// Fails without running anything when the task was already submitted,
    /// already ran as part of another graph, the pool is shut down or has no
    /// runtime to run on. May be called from threads outside the runtime.
    pub fn submit<R>(&self, task: Task<R>) -> EngineResult<TaskHandle<R>>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.pool.runtime()?;
        if self.pool.is_shut_down() {
            return Err(EngineError::Configuration(format!(
                "cannot submit '{}': execution pool is shut down",
                task.tag()
            )));
        }
        let node = Arc::clone(task.node());
        if node.state() != TaskState::Pending || node.outcome.initialized() {
            return Err(EngineError::Configuration(format!(
                "task '{}' already ran ({})",
                task.tag(),
                node.state()
            )));
        }
        if !node.mark_submitted() {
            return Err(EngineError::Configuration(format!(
                "task '{}' was already submitted",
                task.tag()
            )));
        }
        graph::seal_subtree(&node);

        let aggregator = Arc::new(ProgressAggregator::from_node(&node));
        let completion = Completion::new();
        let handle = TaskHandle::new(task.clone(), aggregator, Arc::clone(&completion));

        let scheduler = self.clone();
        self.pool.spawn(Box::pin(async move {
            let outcome = scheduler.run_node(node).await;
            completion.finish(&task, outcome);
        }))?;

        Ok(handle)
    }

    /// Submits `task` and waits for its report.
    pub async fn run<R>(&self, task: Task<R>) -> EngineResult<TaskReport<R>>
    where
        R: Clone + Send + Sync + 'static,
    {
        let handle = self.submit(task)?;
        Ok(handle.wait().await)
    }

    /// Runs a node at most once; later callers share the first outcome.
    fn run_node(&self, node: Arc<TaskNode>) -> BoxFuture<'static, NodeOutcome> {
        let scheduler = self.clone();
        Box::pin(async move {
            let driven = Arc::clone(&node);
            node.outcome
                .get_or_init(|| scheduler.drive(driven))
                .await
                .clone()
        })
    }

    async fn drive(self, node: Arc<TaskNode>) -> NodeOutcome {
        if node.is_cancelled() || self.pool.is_shut_down() {
            return abort(&node, cancelled(&node));
        }

        // 1-2. Pre-dependencies as one cohort, barrier join.
        let pre = node.pre_dependencies();
        if !pre.is_empty() {
            let results = self.run_cohort(&pre).await;
            if let Some(blocked) = first_blocking(&pre, results) {
                let (state, cause) = blocked;
                return finish(&node, state, cause);
            }
        }

        // 3. Body.
        if node.is_cancelled() {
            return abort(&node, cancelled(&node));
        }
        let slot = tokio::select! {
            biased;
            _ = node.token().cancelled() => None,
            slot = self.pool.acquire() => slot,
        };
        let Some(slot) = slot else {
            return abort(&node, cancelled(&node));
        };
        if node.is_cancelled() || self.pool.is_shut_down() {
            return abort(&node, cancelled(&node));
        }
        let Some(body) = node.take_body() else {
            return finish(
                &node,
                TaskState::Failed,
                Arc::new(EngineError::Configuration(format!(
                    "body of '{}' was already consumed",
                    node.tag()
                ))),
            );
        };

        if !node.is_quiet() {
            debug!("Executing task: {}", node.tag());
        }
        node.transition(TaskState::Running);
        let cx = TaskContext::new(
            Arc::clone(&node),
            self.pool.shutdown_token(),
            self.progress_interval,
        );
        let result = AssertUnwindSafe(body.run(cx.clone())).catch_unwind().await;
        drop(slot);

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_cancelled() || cx.is_cancelled() => {
                return abort(&node, Arc::new(err));
            }
            Ok(Err(err)) => {
                return finish(&node, TaskState::Failed, Arc::new(err));
            }
            Err(_) => {
                return finish(
                    &node,
                    TaskState::Failed,
                    Arc::new(EngineError::Other(format!("task '{}' panicked", node.tag()))),
                );
            }
        }

        if let Some(composed) = node.take_composed() {
            if let Err((state, cause)) = self.run_composed(&node, composed).await {
                return finish(&node, state, cause);
            }
        }
        node.succeed();
        if !node.is_quiet() {
            debug!("Task finished: {}", node.tag());
        }

        // 4. Post-dependencies; their failures never touch this node's state.
        let post = node.post_dependencies();
        let mut post_failures = Vec::new();
        if !post.is_empty() {
            for (index, joined) in self.run_cohort(&post).await {
                let child = &post[index];
                let outcome = joined_outcome(child, joined);
                if outcome.state != TaskState::Succeeded {
                    let cause = outcome.cause.clone().unwrap_or_else(|| cancelled(child));
                    warn!(
                        "Post-dependency '{}' of '{}' {}: {}",
                        child.tag(),
                        node.tag(),
                        outcome.state,
                        cause
                    );
                    post_failures.push(SiblingFailure {
                        tag: child.tag().to_string(),
                        state: outcome.state,
                        cause,
                    });
                }
                post_failures.extend(outcome.post_failures);
            }
        }

        // 5. Report.
        NodeOutcome {
            state: TaskState::Succeeded,
            cause: None,
            post_failures,
        }
    }

    /// Runs the graph a body composed, outside of any worker slot, then
    /// forwards its result. Cancelling `node` cancels the composed graph.
    async fn run_composed(
        &self,
        node: &Arc<TaskNode>,
        composed: Composed,
    ) -> Result<(), (TaskState, Arc<EngineError>)> {
        let Composed { inner, publish } = composed;
        graph::seal_subtree(&inner);
        let members = [inner];

        let run = self.run_cohort(&members);
        tokio::pin!(run);
        let results = tokio::select! {
            results = &mut run => results,
            _ = node.token().cancelled() => {
                graph::cancel_subtree(&members[0]);
                run.await
            }
        };

        if let Some(blocked) = first_blocking(&members, results) {
            return Err(blocked);
        }
        publish().map_err(|err| (TaskState::Failed, Arc::new(err)))
    }

    async fn run_cohort(
        &self,
        members: &[Arc<TaskNode>],
    ) -> Vec<(usize, Result<NodeOutcome, JoinError>)> {
        let cohort = members
            .iter()
            .map(|member| self.run_node(Arc::clone(member)))
            .collect();
        self.pool.submit(cohort).await
    }
}

/// Picks the first failed member in completion order, falling back to the
/// first aborted one. Ties are impossible: the pool yields one at a time.
fn first_blocking(
    members: &[Arc<TaskNode>],
    results: Vec<(usize, Result<NodeOutcome, JoinError>)>,
) -> Option<(TaskState, Arc<EngineError>)> {
    let mut first_aborted = None;
    for (index, joined) in results {
        let member = &members[index];
        let outcome = joined_outcome(member, joined);
        match outcome.state {
            TaskState::Succeeded => {}
            TaskState::Failed => {
                return Some((TaskState::Failed, dependency_failed(member, outcome.cause)));
            }
            _ => {
                if first_aborted.is_none() {
                    first_aborted = Some((TaskState::Aborted, dependency_failed(member, outcome.cause)));
                }
            }
        }
    }
    first_aborted
}

fn joined_outcome(node: &Arc<TaskNode>, joined: Result<NodeOutcome, JoinError>) -> NodeOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("Worker running '{}' was lost: {}", node.tag(), err);
            NodeOutcome {
                state: TaskState::Aborted,
                cause: Some(Arc::new(EngineError::Other(format!(
                    "worker running '{}' was lost: {}",
                    node.tag(),
                    err
                )))),
                post_failures: Vec::new(),
            }
        }
    }
}

fn dependency_failed(dep: &Arc<TaskNode>, cause: Option<Arc<EngineError>>) -> Arc<EngineError> {
    Arc::new(EngineError::DependencyFailed {
        tag: dep.tag().to_string(),
        source: cause.unwrap_or_else(|| cancelled(dep)),
    })
}

fn cancelled(node: &Arc<TaskNode>) -> Arc<EngineError> {
    Arc::new(EngineError::Cancelled {
        tag: node.tag().to_string(),
    })
}

fn abort(node: &Arc<TaskNode>, cause: Arc<EngineError>) -> NodeOutcome {
    finish(node, TaskState::Aborted, cause)
}

fn finish(node: &Arc<TaskNode>, state: TaskState, cause: Arc<EngineError>) -> NodeOutcome {
    if !node.is_quiet() {
        match state {
            TaskState::Aborted => debug!("Task aborted: {} ({})", node.tag(), cause),
            _ => warn!("Task failed: {}: {}", node.tag(), cause),
        }
    }
    node.terminate(state, Arc::clone(&cause));
    NodeOutcome {
        state,
        cause: Some(cause),
        post_failures: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::core::task::TaskListener;

    fn scheduler(capacity: usize) -> Scheduler {
        Scheduler::new(Arc::new(ExecutionPool::new(capacity)))
    }

    fn failing(tag: &str, message: &'static str) -> Task<()> {
        Task::supply(tag, move |_cx| async move { Err(EngineError::Other(message.into())) })
    }

    fn flagged(tag: &str, ran: Arc<AtomicBool>) -> Task<()> {
        Task::supply(tag, move |_cx| async move {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, TaskState)>>);

    impl TaskListener for Recorder {
        fn on_state(&self, tag: &str, state: TaskState) {
            self.0.lock().push((tag.to_string(), state));
        }
    }

    #[tokio::test]
    async fn body_without_dependencies_runs_immediately() {
        let task = Task::supply("answer", |_cx| async { Ok(42u32) });
        let report = scheduler(2).run(task.clone()).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.result, Some(42));
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.progress(), 1.0);
    }

    #[tokio::test]
    async fn body_runs_after_its_single_dependency_succeeded() {
        let dep = Task::supply("dep", |_cx| async { Ok(String::from("payload")) });
        let input = dep.channel();
        let root = Task::supply("root", move |_cx| async move {
            Ok(input.read()?.len())
        });
        root.add_pre_dependency(&dep).unwrap();

        let report = scheduler(2).run(root).await.unwrap();
        assert_eq!(report.result, Some(7));
    }

    #[tokio::test]
    async fn failing_dependency_skips_body_but_lets_siblings_finish() {
        let body_ran = Arc::new(AtomicBool::new(false));
        let sibling_done = Arc::new(AtomicBool::new(false));

        let root = flagged("root", Arc::clone(&body_ran));
        let bad = failing("bad", "mirror offline");
        let slow = {
            let sibling_done = Arc::clone(&sibling_done);
            Task::supply("slow", move |_cx| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                sibling_done.store(true, Ordering::SeqCst);
                Ok(())
            })
        };
        root.add_pre_dependency(&bad).unwrap();
        root.add_pre_dependency(&slow).unwrap();

        let report = scheduler(4).run(root.clone()).await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(!body_ran.load(Ordering::SeqCst));
        assert!(sibling_done.load(Ordering::SeqCst));
        assert_eq!(slow.state(), TaskState::Succeeded);
        assert!(matches!(
            report.cause.as_deref(),
            Some(EngineError::DependencyFailed { tag, .. }) if tag == "bad"
        ));
        assert_eq!(report.root_cause().unwrap().to_string(), "mirror offline");
        assert_eq!(root.state(), TaskState::Failed);
    }

    #[tokio::test]
    async fn first_observed_failure_becomes_the_cause() {
        let root = Task::supply("root", |_cx| async { Ok(()) });
        let late = Task::supply("late", |_cx| async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Err::<(), _>(EngineError::Other("late".into()))
        });
        let early = failing("early", "early");
        root.add_pre_dependency(&late).unwrap();
        root.add_pre_dependency(&early).unwrap();

        let report = scheduler(4).run(root).await.unwrap();
        assert_eq!(report.root_cause().unwrap().to_string(), "early");
        assert_eq!(late.state(), TaskState::Failed);
    }

    #[tokio::test]
    async fn failed_chain_step_stops_the_chain_with_its_cause() {
        let install_ran = Arc::new(AtomicBool::new(false));

        let download = Task::supply("download", |_cx| async { Ok(vec![1u8, 2, 3]) });
        let verify = download.then("verify", |_bytes, _cx| async {
            Err::<Vec<u8>, _>(EngineError::Other("archive is truncated".into()))
        });
        let install = {
            let install_ran = Arc::clone(&install_ran);
            verify.then("install", move |_bytes, _cx| async move {
                install_ran.store(true, Ordering::SeqCst);
                Ok(())
            })
        };

        let report = scheduler(2).run(install.clone()).await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(!install_ran.load(Ordering::SeqCst));
        assert_eq!(download.state(), TaskState::Succeeded);
        assert_eq!(verify.state(), TaskState::Failed);
        assert_eq!(
            report.root_cause().unwrap().to_string(),
            verify.cause().unwrap().to_string()
        );
    }

    #[tokio::test]
    async fn chain_threads_results_between_steps() {
        let fetch = Task::supply("fetch", |_cx| async { Ok(20u32) });
        let double = fetch.then("double", |n, _cx| async move { Ok(n * 2) });
        let render = double.then("render", |n, _cx| async move { Ok(format!("v{n}")) });

        let report = scheduler(1).run(render).await.unwrap();
        assert_eq!(report.into_result().unwrap(), "v40");
    }

    #[tokio::test]
    async fn post_dependencies_run_after_success_and_never_fail_the_parent() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let root = {
            let order = Arc::clone(&order);
            Task::supply("root", move |_cx| async move {
                order.lock().push("root");
                Ok(())
            })
        };
        let cleanup = {
            let order = Arc::clone(&order);
            Task::supply("cleanup", move |_cx| async move {
                order.lock().push("cleanup");
                Ok(())
            })
        };
        let broken = failing("index-refresh", "index unavailable");
        root.add_post_dependency(&cleanup).unwrap();
        root.add_post_dependency(&broken).unwrap();

        let report = scheduler(2).run(root).await.unwrap();

        assert_eq!(report.state, TaskState::Succeeded);
        assert_eq!(report.post_failures.len(), 1);
        assert_eq!(report.post_failures[0].tag, "index-refresh");
        assert_eq!(order.lock().first(), Some(&"root"));
        assert_eq!(cleanup.state(), TaskState::Succeeded);
    }

    #[tokio::test]
    async fn post_dependencies_are_skipped_when_the_body_fails() {
        let post_ran = Arc::new(AtomicBool::new(false));
        let root = failing("root", "boom");
        let post = flagged("post", Arc::clone(&post_ran));
        root.add_post_dependency(&post).unwrap();

        let report = scheduler(2).run(root).await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(!post_ran.load(Ordering::SeqCst));
        assert_eq!(post.state(), TaskState::Pending);
    }

    #[tokio::test]
    async fn shared_dependency_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shared = {
            let runs = Arc::clone(&runs);
            Task::supply("shared", move |_cx| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let left = Task::supply("left", |_cx| async { Ok(()) });
        let right = Task::supply("right", |_cx| async { Ok(()) });
        let root = Task::supply("root", |_cx| async { Ok(()) });
        left.add_pre_dependency(&shared).unwrap();
        right.add_pre_dependency(&shared).unwrap();
        root.add_pre_dependency(&left).unwrap();
        root.add_pre_dependency(&right).unwrap();

        let report = scheduler(4).run(root).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_pool_capacity() {
        let scheduler = scheduler(2);
        let tasks: Vec<Task<()>> = (0..10)
            .map(|i| {
                Task::supply(format!("leaf-{i}"), |_cx| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                })
            })
            .collect();
        let root = Task::all_of("leaves", tasks);

        let report = scheduler.run(root).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.result.map(|r| r.len()), Some(10));
        assert!(scheduler.pool().peak_running() <= 2);
        assert_eq!(scheduler.pool().running(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let task = flagged("never", Arc::clone(&ran));
        task.cancel();

        let report = scheduler(1).run(task).await.unwrap();

        assert_eq!(report.state, TaskState::Aborted);
        assert!(!ran.load(Ordering::SeqCst));
        assert!(report.cause.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn running_body_observes_cancellation_at_checkpoints() {
        let task = Task::supply("spinner", |cx: TaskContext| async move {
            while !cx.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            cx.checkpoint()
        });
        let handle = scheduler(1).submit(task.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.state(), TaskState::Running);

        handle.cancel();
        let report = handle.wait().await;

        assert_eq!(report.state, TaskState::Aborted);
        assert!(report.cause.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn aborted_dependency_aborts_the_parent() {
        let root = Task::supply("root", |_cx| async { Ok(()) });
        let dep = Task::supply("dep", |_cx| async { Ok(()) });
        root.add_pre_dependency(&dep).unwrap();
        dep.cancel();

        let report = scheduler(1).run(root).await.unwrap();
        assert_eq!(report.state, TaskState::Aborted);
        assert!(report.cause.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn resubmission_and_late_edges_are_configuration_errors() {
        let scheduler = scheduler(1);
        let task = Task::supply("once", |_cx| async { Ok(()) });
        let extra = Task::supply("extra", |_cx| async { Ok(()) });

        let handle = scheduler.submit(task.clone()).unwrap();
        assert!(matches!(
            task.add_pre_dependency(&extra),
            Err(EngineError::Configuration(_))
        ));
        handle.wait().await;

        assert!(matches!(
            scheduler.submit(task),
            Err(EngineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn listeners_see_running_then_terminal_state() {
        let recorder = Arc::new(Recorder::default());
        let task = Task::supply("observed", |_cx| async { Ok(()) });
        task.add_listener(recorder.clone());

        scheduler(1).run(task).await.unwrap();

        let states: Vec<TaskState> = recorder.0.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(states, vec![TaskState::Running, TaskState::Succeeded]);
    }

    #[tokio::test]
    async fn progress_callbacks_report_aggregated_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = Task::supply("steps", |cx: TaskContext| async move {
            for step in 1..=4u64 {
                cx.set_progress(step, 4);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(())
        });

        let handle = scheduler(1).submit(task).unwrap();
        {
            let seen = Arc::clone(&seen);
            handle.on_progress(move |value| seen.lock().push(value));
        }
        let report = handle.wait().await;

        assert!(report.succeeded());
        assert_eq!(handle.progress(), 1.0);
        let values = seen.lock().clone();
        assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn completion_callback_fires_even_when_registered_late() {
        let task = Task::supply("done", |_cx| async { Ok(5u8) });
        let handle = scheduler(1).submit(task).unwrap();
        handle.wait().await;
        assert!(handle.is_finished());

        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.on_complete(move |report| {
            let _ = tx.send(report.result);
        });
        assert_eq!(rx.await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn pool_shutdown_aborts_queued_and_running_work() {
        let pool = Arc::new(ExecutionPool::new(1));
        let scheduler = Scheduler::new(Arc::clone(&pool));
        let queued_ran = Arc::new(AtomicBool::new(false));

        let blocker = Task::supply("blocker", |cx: TaskContext| async move {
            cx.cancelled().await;
            cx.checkpoint()
        });
        let running = scheduler.submit(blocker.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(blocker.state(), TaskState::Running);

        let queued = flagged("queued", Arc::clone(&queued_ran));
        let waiting = scheduler.submit(queued.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queued.state(), TaskState::Pending);

        pool.shutdown().await;

        assert!(running.is_finished());
        assert!(waiting.is_finished());
        assert_eq!(running.wait().await.state, TaskState::Aborted);
        assert_eq!(waiting.wait().await.state, TaskState::Aborted);
        assert!(!queued_ran.load(Ordering::SeqCst));
        assert!(scheduler
            .submit(Task::supply("late", |_cx| async { Ok(()) }))
            .is_err());
    }

    #[tokio::test]
    async fn cancelling_a_task_waiting_for_a_slot_aborts_it_at_once() {
        let scheduler = scheduler(1);
        let queued_ran = Arc::new(AtomicBool::new(false));

        let blocker = Task::supply("blocker", |cx: TaskContext| async move {
            cx.cancelled().await;
            cx.checkpoint()
        });
        let running = scheduler.submit(blocker.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(blocker.state(), TaskState::Running);

        let queued = flagged("queued", Arc::clone(&queued_ran));
        let waiting = scheduler.submit(queued.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiting.cancel();

        let report = tokio::time::timeout(Duration::from_millis(500), waiting.wait())
            .await
            .expect("queued task must not wait for the running one");
        assert_eq!(report.state, TaskState::Aborted);
        assert!(report.cause.unwrap().is_cancelled());
        assert!(!queued_ran.load(Ordering::SeqCst));
        assert_eq!(blocker.state(), TaskState::Running);

        running.cancel();
        assert_eq!(running.wait().await.state, TaskState::Aborted);
        assert_eq!(scheduler.pool().running(), 0);
    }

    #[tokio::test]
    async fn composed_graph_result_becomes_the_step_result() {
        // One slot: the composed graph must run while the composing body
        // no longer holds it.
        let scheduler = scheduler(1);
        let versions = Task::supply("versions", |_cx| async { Ok(vec![1u32, 2, 3]) });
        let total = versions.then_compose("fetch all", |ids, _cx| {
            let parts = ids
                .into_iter()
                .map(|id| Task::supply(format!("part-{id}"), move |_cx| async move { Ok(id * 10) }))
                .collect();
            Ok(Task::all_of("parts", parts).then("sum", |values, _cx| async move {
                Ok(values.iter().sum::<u32>())
            }))
        });
        let label = total.then("label", |sum, _cx| async move { Ok(format!("{sum} bytes")) });

        let report = scheduler.run(label).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.result.as_deref(), Some("60 bytes"));
        assert_eq!(total.result(), Some(60));
        assert_eq!(total.state(), TaskState::Succeeded);
    }

    #[tokio::test]
    async fn failing_composed_task_fails_the_step_with_dependency_failed() {
        let after_ran = Arc::new(AtomicBool::new(false));
        let start = Task::supply("start", |_cx| async { Ok(2u32) });
        let step = start.then_compose("libraries", |_count, _cx| {
            let good = Task::supply("lib-a", |_cx| async { Ok(()) });
            let bad = failing("lib-b", "checksum mismatch");
            Ok(Task::all_of("libs", vec![good, bad]))
        });
        let after = {
            let after_ran = Arc::clone(&after_ran);
            step.then("write", move |_libs, _cx| async move {
                after_ran.store(true, Ordering::SeqCst);
                Ok(())
            })
        };

        let report = scheduler(2).run(after).await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(!after_ran.load(Ordering::SeqCst));
        assert_eq!(step.state(), TaskState::Failed);
        assert!(matches!(
            step.cause().as_deref(),
            Some(EngineError::DependencyFailed { tag, .. }) if tag == "libs"
        ));
        assert_eq!(report.root_cause().unwrap().to_string(), "checksum mismatch");
    }

    #[tokio::test]
    async fn composing_a_graph_that_contains_the_step_is_rejected() {
        let start = Task::supply("start", |_cx| async { Ok(()) });
        let slot: Arc<Mutex<Option<Task<()>>>> = Arc::new(Mutex::new(None));
        let step = {
            let slot = Arc::clone(&slot);
            start.then_compose("loop", move |_, _cx| {
                slot.lock()
                    .clone()
                    .ok_or_else(|| EngineError::Other("step not stored".into()))
            })
        };
        *slot.lock() = Some(step.clone());

        let report = scheduler(1).run(step).await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(matches!(
            report.cause.as_deref(),
            Some(EngineError::Configuration(msg)) if msg.contains("depends on itself")
        ));
    }

    #[test]
    fn submit_from_a_thread_outside_the_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let scheduler = Scheduler::new(Arc::new(ExecutionPool::with_runtime(
            2,
            runtime.handle().clone(),
        )));

        let handle = std::thread::spawn(move || {
            let fetch = Task::supply("fetch", |_cx| async { Ok(20u32) });
            scheduler
                .submit(fetch.then("double", |n, _cx| async move { Ok(n * 2) }))
                .unwrap()
        })
        .join()
        .unwrap();

        let report = runtime.block_on(handle.wait());
        assert_eq!(report.result, Some(40));
    }

    #[test]
    fn submit_without_a_runtime_is_a_configuration_error() {
        let task = Task::supply("orphan", |_cx| async { Ok(()) });
        let scheduler = Scheduler::new(Arc::new(ExecutionPool::new(1)));

        let err = scheduler.submit(task.clone()).unwrap_err();

        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(task.state(), TaskState::Pending);
    }
}
