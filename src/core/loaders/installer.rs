use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    context::InstallRequest, fabric::FabricInstaller, forge::ForgeInstaller,
    neoforge::NeoForgeInstaller, quilt::QuiltInstaller,
};
use crate::core::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerKind {
    Forge,
    NeoForge,
    Fabric,
    Quilt,
}

impl InstallerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallerKind::Forge => "forge",
            InstallerKind::NeoForge => "neoforge",
            InstallerKind::Fabric => "fabric",
            InstallerKind::Quilt => "quilt",
        }
    }
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallerKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "forge" => Ok(InstallerKind::Forge),
            "neoforge" => Ok(InstallerKind::NeoForge),
            "fabric" => Ok(InstallerKind::Fabric),
            "quilt" => Ok(InstallerKind::Quilt),
            other => Err(EngineError::Installer(format!("unknown loader '{other}'"))),
        }
    }
}

/// Where a loader's installer artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    pub file_name: String,
    /// Candidates in fallback order.
    pub urls: Vec<String>,
}

/// Per-loader strategy plugged into the install chain.
#[async_trait]
pub trait LoaderInstaller: Send + Sync {
    fn artifact(&self, request: &InstallRequest, use_mirror: bool) -> EngineResult<ArtifactSource>;

    /// Extracts the version metadata carried by the downloaded artifact.
    async fn read_version(&self, artifact: &Path) -> EngineResult<serde_json::Value>;

    fn default_version_id(&self, request: &InstallRequest) -> String;
}

/// Static dispatch over the loader strategies.
#[derive(Debug, Clone)]
pub enum Installer {
    Forge(ForgeInstaller),
    NeoForge(NeoForgeInstaller),
    Fabric(FabricInstaller),
    Quilt(QuiltInstaller),
}

impl Installer {
    pub fn new(kind: InstallerKind) -> Self {
        match kind {
            InstallerKind::Forge => Self::Forge(ForgeInstaller),
            InstallerKind::NeoForge => Self::NeoForge(NeoForgeInstaller),
            InstallerKind::Fabric => Self::Fabric(FabricInstaller),
            InstallerKind::Quilt => Self::Quilt(QuiltInstaller),
        }
    }

    pub fn kind(&self) -> InstallerKind {
        match self {
            Installer::Forge(_) => InstallerKind::Forge,
            Installer::NeoForge(_) => InstallerKind::NeoForge,
            Installer::Fabric(_) => InstallerKind::Fabric,
            Installer::Quilt(_) => InstallerKind::Quilt,
        }
    }

    fn strategy(&self) -> &dyn LoaderInstaller {
        match self {
            Installer::Forge(i) => i,
            Installer::NeoForge(i) => i,
            Installer::Fabric(i) => i,
            Installer::Quilt(i) => i,
        }
    }

    pub fn artifact(&self, request: &InstallRequest, use_mirror: bool) -> EngineResult<ArtifactSource> {
        self.strategy().artifact(request, use_mirror)
    }

    pub async fn read_version(&self, artifact: &Path) -> EngineResult<serde_json::Value> {
        self.strategy().read_version(artifact).await
    }

    pub fn default_version_id(&self, request: &InstallRequest) -> String {
        self.strategy().default_version_id(request)
    }
}

pub(super) fn require_versions(request: &InstallRequest) -> EngineResult<()> {
    if request.minecraft_version.trim().is_empty() || request.loader_version.trim().is_empty() {
        return Err(EngineError::Installer(format!(
            "{} needs both a game and a loader version",
            request.kind
        )));
    }
    Ok(())
}

/// `<mc>-<loader>` unless the loader version already carries the prefix.
pub(super) fn qualified_version(request: &InstallRequest) -> String {
    let prefix = format!("{}-", request.minecraft_version);
    if request.loader_version.starts_with(&prefix) {
        request.loader_version.clone()
    } else {
        format!("{}{}", prefix, request.loader_version)
    }
}

pub(super) async fn read_artifact(path: &Path) -> EngineResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| EngineError::io(path, e))
}
