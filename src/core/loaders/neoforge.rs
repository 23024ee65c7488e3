use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::context::InstallRequest;
use super::forge::version_from_installer;
use super::installer::{
    qualified_version, read_artifact, require_versions, ArtifactSource, LoaderInstaller,
};
use crate::core::error::EngineResult;
use crate::core::maven::{MavenArtifact, BMCLAPI_MAVEN, NEOFORGE_MAVEN};

/// NeoForge: same installer layout as Forge, published under `net.neoforged`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeoForgeInstaller;

#[async_trait]
impl LoaderInstaller for NeoForgeInstaller {
    fn artifact(&self, request: &InstallRequest, use_mirror: bool) -> EngineResult<ArtifactSource> {
        require_versions(request)?;

        // 1.20.2+ is `net.neoforged:neoforge:<loader>`; the 1.20.1 releases were
        // published as `net.neoforged:forge:<mc>-<loader>`.
        let current = MavenArtifact::parse(&format!(
            "net.neoforged:neoforge:{}",
            request.loader_version
        ))?
        .installer();
        let legacy = MavenArtifact::parse(&format!(
            "net.neoforged:forge:{}",
            qualified_version(request)
        ))?
        .installer();

        let mut urls = vec![current.url(NEOFORGE_MAVEN), legacy.url(NEOFORGE_MAVEN)];
        if use_mirror {
            urls.push(current.url(BMCLAPI_MAVEN));
            urls.push(legacy.url(BMCLAPI_MAVEN));
        }
        Ok(ArtifactSource {
            file_name: current.filename(),
            urls,
        })
    }

    async fn read_version(&self, artifact: &Path) -> EngineResult<serde_json::Value> {
        info!("Reading NeoForge installer {:?}", artifact);
        let bytes = read_artifact(artifact).await?;
        version_from_installer(&bytes)
    }

    fn default_version_id(&self, request: &InstallRequest) -> String {
        format!("neoforge-{}", request.loader_version)
    }
}
