mod channel;
mod context;
pub(crate) mod graph;
pub(crate) mod node;
mod progress;
mod state;
#[allow(clippy::module_inception)]
mod task;

pub use channel::ResultChannel;
pub use context::TaskContext;
pub use node::SiblingFailure;
pub use progress::ProgressAggregator;
pub use state::{TaskListener, TaskState};
pub use task::{Task, TaskBody};
