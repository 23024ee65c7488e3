pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::error::{EngineError, EngineResult};
pub use crate::core::scheduler::{Scheduler, TaskHandle, TaskReport};
pub use crate::core::state::{EngineContext, EngineSettings};
pub use crate::core::task::{Task, TaskContext, TaskState};

/// Structured logging for binaries and embedders. `RUST_LOG` overrides the
/// default filter; a second call is a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,launcher_engine=debug")),
        )
        .try_init();
}
