use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::downloader::DownloadPolicy;
use crate::core::error::{EngineError, EngineResult};

const APP_DIR_NAME: &str = "LauncherEngine";
const SETTINGS_FILE: &str = "engine_settings.json";

/// Engine configuration, persisted as JSON under the data directory.
/// Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/cache`.
    pub cache_dir: Option<PathBuf>,
    /// Worker slots shared by every task body.
    pub pool_size: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Tries per URL for transient failures (timeouts, resets, 5xx).
    pub attempts_per_candidate: usize,
    /// Minimum delay between progress notifications of one task; 0 = every change.
    pub progress_interval_ms: u64,
    /// Append the community mirror after official installer URLs.
    pub use_mirror: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_dir: None,
            pool_size: 8,
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            attempts_per_candidate: 3,
            progress_interval_ms: 0,
            use_mirror: false,
        }
    }
}

impl EngineSettings {
    /// Default settings rooted at `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Reads `<data_dir>/engine_settings.json`. A missing file yields defaults;
    /// a malformed one is logged and replaced by defaults.
    pub fn load(data_dir: &Path) -> EngineResult<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::in_dir(data_dir));
            }
            Err(e) => return Err(EngineError::io(&path, e)),
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(mut settings) => {
                settings.data_dir = data_dir.to_path_buf();
                info!("Loaded engine settings from {:?}", path);
                Ok(settings)
            }
            Err(e) => {
                warn!("Ignoring malformed settings file {:?}: {}", path, e);
                Ok(Self::in_dir(data_dir))
            }
        }
    }

    pub fn save(&self) -> EngineResult<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| EngineError::io(&self.data_dir, e))?;
        let path = self.data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| EngineError::io(&path, e))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cache"))
    }

    /// Where installer artifacts are downloaded before they are read.
    pub fn installers_dir(&self) -> PathBuf {
        self.data_dir.join("installers")
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn download_policy(&self) -> DownloadPolicy {
        DownloadPolicy {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            read_timeout: Duration::from_secs(self.read_timeout_secs.max(1)),
            attempts_per_candidate: self.attempts_per_candidate.max(1),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
