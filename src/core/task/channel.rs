use std::sync::{Arc, OnceLock};

use crate::core::error::{EngineError, EngineResult};

/// Write-once slot carrying a task's result to the tasks that follow it.
///
/// Created together with its producer and filled when the producer's body
/// succeeds. Reading earlier is a wiring mistake and fails immediately with
/// `ResultUnavailable` instead of waiting.
pub struct ResultChannel<R> {
    producer: Arc<str>,
    slot: Arc<OnceLock<R>>,
}

impl<R> Clone for ResultChannel<R> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<R: Clone> ResultChannel<R> {
    pub(crate) fn new(producer: &str) -> Self {
        Self {
            producer: Arc::from(producer),
            slot: Arc::new(OnceLock::new()),
        }
    }

    pub(crate) fn publish(&self, value: R) -> EngineResult<()> {
        self.slot.set(value).map_err(|_| {
            EngineError::Configuration(format!(
                "result of '{}' published more than once",
                self.producer
            ))
        })
    }

    pub fn read(&self) -> EngineResult<R> {
        self.slot
            .get()
            .cloned()
            .ok_or_else(|| EngineError::ResultUnavailable {
                tag: self.producer.to_string(),
            })
    }

    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }
}

impl<R> std::fmt::Debug for ResultChannel<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultChannel")
            .field("producer", &self.producer)
            .field("ready", &self.slot.get().is_some())
            .finish()
    }
}
