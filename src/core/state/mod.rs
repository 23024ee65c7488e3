mod context;
mod settings;

pub use context::EngineContext;
pub use settings::{default_data_dir, EngineSettings};
