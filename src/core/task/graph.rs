use std::collections::HashSet;
use std::sync::Arc;

use super::node::TaskNode;

/// Every node reachable from `root` through pre and post edges, root first,
/// each node once.
pub(crate) fn subtree(root: &Arc<TaskNode>) -> Vec<Arc<TaskNode>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![Arc::clone(root)];

    while let Some(node) = stack.pop() {
        if !seen.insert(TaskNode::key(&node)) {
            continue;
        }
        let mut next = node.pre_dependencies();
        next.extend(node.post_dependencies());
        // Reverse so that the first declared edge is visited first.
        stack.extend(next.into_iter().rev());
        order.push(node);
    }

    order
}

/// Whether `target` is reachable from `from`. Adding an edge
/// `target -> from` is a cycle exactly when this holds.
pub(crate) fn reaches(from: &Arc<TaskNode>, target: &Arc<TaskNode>) -> bool {
    subtree(from)
        .iter()
        .any(|node| TaskNode::same(node, target))
}

pub(crate) fn cancel_subtree(root: &Arc<TaskNode>) {
    for node in subtree(root) {
        node.token().cancel();
    }
}

pub(crate) fn seal_subtree(root: &Arc<TaskNode>) {
    for node in subtree(root) {
        node.seal();
    }
}
