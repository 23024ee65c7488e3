use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::context::InstallRequest;
use super::installer::{read_artifact, require_versions, ArtifactSource, LoaderInstaller};
use crate::core::error::{EngineError, EngineResult};
use crate::core::maven::{BMCLAPI_FABRIC_META, FABRIC_META};

/// Fabric: Fabric Meta serves a ready launcher profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct FabricInstaller;

#[async_trait]
impl LoaderInstaller for FabricInstaller {
    fn artifact(&self, request: &InstallRequest, use_mirror: bool) -> EngineResult<ArtifactSource> {
        require_versions(request)?;
        let mut bases = vec![FABRIC_META];
        if use_mirror {
            bases.push(BMCLAPI_FABRIC_META);
        }
        Ok(ArtifactSource {
            file_name: format!(
                "fabric-loader-{}-{}.json",
                request.loader_version, request.minecraft_version
            ),
            urls: bases
                .into_iter()
                .map(|base| profile_url(base, request))
                .collect(),
        })
    }

    async fn read_version(&self, artifact: &Path) -> EngineResult<serde_json::Value> {
        info!("Reading Fabric profile {:?}", artifact);
        read_profile(artifact).await
    }

    fn default_version_id(&self, request: &InstallRequest) -> String {
        format!(
            "fabric-loader-{}-{}",
            request.loader_version, request.minecraft_version
        )
    }
}

/// `<meta>/versions/loader/<mc>/<loader>/profile/json`, shared by the Fabric
/// and Quilt meta services.
pub(super) fn profile_url(base: &str, request: &InstallRequest) -> String {
    format!(
        "{}/versions/loader/{}/{}/profile/json",
        base.trim_end_matches('/'),
        request.minecraft_version,
        request.loader_version
    )
}

pub(super) async fn read_profile(artifact: &Path) -> EngineResult<serde_json::Value> {
    let bytes = read_artifact(artifact).await?;
    let profile: serde_json::Value = serde_json::from_slice(&bytes)?;
    if !profile.is_object() {
        return Err(EngineError::Installer(format!(
            "{:?} is not a launcher profile",
            artifact
        )));
    }
    Ok(profile)
}
