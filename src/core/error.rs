use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Central error type for the task engine.
/// Every module returns `Result<T, EngineError>`.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Transport ───────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Transfer from {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Timed out while {phase} {url}")]
    Timeout { url: String, phase: &'static str },

    // ── Integrity ───────────────────────────────────────
    #[error("{algorithm} mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("All download candidates exhausted after {attempts} attempt(s): {last}")]
    AllCandidatesExhausted {
        attempts: usize,
        #[source]
        last: Box<EngineError>,
    },

    // ── Scheduling ──────────────────────────────────────
    #[error("Dependency '{tag}' did not succeed: {source}")]
    DependencyFailed {
        tag: String,
        #[source]
        source: Arc<EngineError>,
    },

    #[error("Task '{tag}' was cancelled")]
    Cancelled { tag: String },

    #[error("Invalid task graph: {0}")]
    Configuration(String),

    #[error("Result of '{tag}' read before the task succeeded")]
    ResultUnavailable { tag: String },

    // ── Installers ──────────────────────────────────────
    #[error("Invalid Maven coordinate: {0}")]
    InvalidMavenCoordinate(String),

    #[error("Installer error: {0}")]
    Installer(String),

    // ── Formats ─────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Per-candidate network failure: recovered by trying the next URL.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::Http(_)
                | EngineError::HttpStatus { .. }
                | EngineError::Transport { .. }
                | EngineError::Timeout { .. }
        )
    }

    /// Worth another attempt against the same URL.
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::HttpStatus { status, .. } => !(400..500).contains(status),
            other => other.is_transport(),
        }
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self.root_cause(), EngineError::ChecksumMismatch { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), EngineError::Cancelled { .. })
    }

    /// Walks dependency and retry wrappers down to the first actionable cause.
    pub fn root_cause(&self) -> &EngineError {
        let mut current = self;
        loop {
            match current {
                EngineError::DependencyFailed { source, .. } => current = source.as_ref(),
                EngineError::AllCandidatesExhausted { last, .. } => current = last.as_ref(),
                other => return other,
            }
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        EngineError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// Collaborators (CLI, GUI) only ever render the message.
impl serde::Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
