use std::io::{Cursor, Read};
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use super::context::InstallRequest;
use super::installer::{
    qualified_version, read_artifact, require_versions, ArtifactSource, LoaderInstaller,
};
use crate::core::error::{EngineError, EngineResult};
use crate::core::maven::{MavenArtifact, BMCLAPI_MAVEN, FORGE_MAVEN};

/// Forge: the installer JAR carries the version JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForgeInstaller;

impl ForgeInstaller {
    fn coordinate(request: &InstallRequest) -> EngineResult<MavenArtifact> {
        let coord = format!("net.minecraftforge:forge:{}", qualified_version(request));
        Ok(MavenArtifact::parse(&coord)?.installer())
    }
}

#[async_trait]
impl LoaderInstaller for ForgeInstaller {
    fn artifact(&self, request: &InstallRequest, use_mirror: bool) -> EngineResult<ArtifactSource> {
        require_versions(request)?;
        let artifact = Self::coordinate(request)?;

        let mut urls = vec![artifact.url(FORGE_MAVEN)];
        if use_mirror {
            urls.push(artifact.url(BMCLAPI_MAVEN));
        }
        Ok(ArtifactSource {
            file_name: artifact.filename(),
            urls,
        })
    }

    async fn read_version(&self, artifact: &Path) -> EngineResult<serde_json::Value> {
        info!("Reading Forge installer {:?}", artifact);
        let bytes = read_artifact(artifact).await?;
        version_from_installer(&bytes)
    }

    fn default_version_id(&self, request: &InstallRequest) -> String {
        format!("{}-forge-{}", request.minecraft_version, loader_part(request))
    }
}

/// Loader version without a leading `<mc>-`.
fn loader_part(request: &InstallRequest) -> &str {
    request
        .loader_version
        .strip_prefix(&format!("{}-", request.minecraft_version))
        .unwrap_or(&request.loader_version)
}

/// Version JSON of a Forge-style installer JAR.
///
/// Modern installers ship `version.json`; legacy ones (before 1.13) embed it
/// as `versionInfo` inside `install_profile.json`.
pub(super) fn version_from_installer(bytes: &[u8]) -> EngineResult<serde_json::Value> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    if let Some(raw) = read_entry(&mut archive, "version.json")? {
        return Ok(serde_json::from_slice(&raw)?);
    }

    if let Some(raw) = read_entry(&mut archive, "install_profile.json")? {
        let mut profile: serde_json::Value = serde_json::from_slice(&raw)?;
        if let Some(info) = profile.get_mut("versionInfo").map(serde_json::Value::take) {
            debug!("Using legacy versionInfo from install_profile.json");
            return Ok(info);
        }
    }

    Err(EngineError::Installer(
        "installer contains neither version.json nor a legacy versionInfo".into(),
    ))
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> EngineResult<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    Ok(Some(raw))
}
