use std::sync::Arc;

use super::graph;
use super::node::TaskNode;
use super::task::Task;

/// Weighted completion of a task and everything below it.
///
/// The subtree is captured at construction, so build the aggregator after
/// all edges are declared.
pub struct ProgressAggregator {
    root: Arc<TaskNode>,
    nodes: Vec<Arc<TaskNode>>,
}

impl ProgressAggregator {
    pub fn new<R>(root: &Task<R>) -> Self
    where
        R: Clone + Send + Sync + 'static,
    {
        Self::from_node(root.node())
    }

    pub(crate) fn from_node(root: &Arc<TaskNode>) -> Self {
        Self {
            root: Arc::clone(root),
            nodes: graph::subtree(root),
        }
    }

    /// Single value in `[0, 1]`.
    pub fn value(&self) -> f64 {
        let (done, total) = self.nodes.iter().fold((0.0, 0.0), |(done, total), node| {
            let weight = node.weight();
            (done + weight * node.progress(), total + weight)
        });
        if total <= 0.0 {
            return self.root.progress();
        }
        (done / total).clamp(0.0, 1.0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Number of tasks tracked.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn nodes(&self) -> &[Arc<TaskNode>] {
        &self.nodes
    }
}
