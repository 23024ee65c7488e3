mod handle;
mod pool;
#[allow(clippy::module_inception)]
mod scheduler;

pub use handle::{TaskHandle, TaskReport};
pub use pool::{ExecutionPool, PoolSlot};
pub use scheduler::Scheduler;
