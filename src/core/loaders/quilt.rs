use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::context::InstallRequest;
use super::fabric::{profile_url, read_profile};
use super::installer::{require_versions, ArtifactSource, LoaderInstaller};
use crate::core::error::EngineResult;
use crate::core::maven::QUILT_META;

/// Quilt: profile JSON from Quilt Meta. No mirror is known for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuiltInstaller;

#[async_trait]
impl LoaderInstaller for QuiltInstaller {
    fn artifact(&self, request: &InstallRequest, _use_mirror: bool) -> EngineResult<ArtifactSource> {
        require_versions(request)?;
        Ok(ArtifactSource {
            file_name: format!(
                "quilt-loader-{}-{}.json",
                request.loader_version, request.minecraft_version
            ),
            urls: vec![profile_url(QUILT_META, request)],
        })
    }

    async fn read_version(&self, artifact: &Path) -> EngineResult<serde_json::Value> {
        info!("Reading Quilt profile {:?}", artifact);
        read_profile(artifact).await
    }

    fn default_version_id(&self, request: &InstallRequest) -> String {
        format!(
            "quilt-loader-{}-{}",
            request.loader_version, request.minecraft_version
        )
    }
}
