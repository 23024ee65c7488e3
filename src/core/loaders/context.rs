use std::path::PathBuf;

use super::installer::InstallerKind;
use crate::core::downloader::Checksum;

/// What to install and into which game directory.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub kind: InstallerKind,
    pub minecraft_version: String,
    pub loader_version: String,
    pub game_dir: PathBuf,
    /// Replaces the loader's default version id.
    pub version_id: Option<String>,
    /// Expected digest of the installer artifact, when known.
    pub checksum: Option<Checksum>,
}

impl InstallRequest {
    pub fn new(
        kind: InstallerKind,
        minecraft_version: impl Into<String>,
        loader_version: impl Into<String>,
        game_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            minecraft_version: minecraft_version.into(),
            loader_version: loader_version.into(),
            game_dir: game_dir.into(),
            version_id: None,
            checksum: None,
        }
    }

    pub fn with_version_id(mut self, id: impl Into<String>) -> Self {
        self.version_id = Some(id.into());
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Human label used in task tags, e.g. `forge 47.2.0`.
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.loader_version)
    }
}
