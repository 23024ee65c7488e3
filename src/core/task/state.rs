use serde::{Deserialize, Serialize};

/// Lifecycle of a task. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Built and possibly submitted, body not started yet.
    Pending,
    /// Body is executing on a worker.
    Running,
    Succeeded,
    Failed,
    /// Cancelled, or never ran because a dependency was cancelled.
    Aborted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Aborted
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Observer of task transitions.
///
/// Callbacks run synchronously on the worker that caused the transition,
/// so implementations must return quickly and never block.
pub trait TaskListener: Send + Sync {
    fn on_state(&self, _tag: &str, _state: TaskState) {}

    fn on_progress(&self, _tag: &str, _progress: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Aborted.is_terminal());
    }
}
