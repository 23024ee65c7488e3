use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::context::InstallRequest;
use super::installer::Installer;
use crate::core::downloader::{Checksum, DownloadDescriptor, DownloadTask};
use crate::core::error::{EngineError, EngineResult};
use crate::core::maven::MavenArtifact;
use crate::core::state::EngineContext;
use crate::core::task::Task;

/// Patched version metadata, ready to be written.
#[derive(Debug, Clone, Serialize)]
pub struct VersionMetadata {
    pub id: String,
    pub json: Value,
}

/// Builds `fetch → verify → patch → libraries → write` for one loader
/// install.
///
/// Each step is a pre-dependency of the next and only sees its
/// predecessor's published result. The libraries step expands into one
/// download per library once the metadata is known. The returned task yields
/// the path of the written `versions/<id>/<id>.json`.
pub fn install_chain(ctx: &EngineContext, request: InstallRequest) -> EngineResult<Task<PathBuf>> {
    let installer = Installer::new(request.kind);
    let source = installer.artifact(&request, ctx.settings().use_mirror)?;
    let label = request.label();

    let mut descriptor = DownloadDescriptor::builder(ctx.settings().installers_dir().join(&source.file_name))
        .urls(source.urls);
    if let Some(checksum) = &request.checksum {
        descriptor = descriptor.checksum(checksum.clone());
    }
    let fetch = DownloadTask::new(ctx, descriptor.build()?).into_task();

    let verify = {
        let installer = installer.clone();
        fetch.then(format!("verify {label}"), move |artifact: PathBuf, cx| async move {
            cx.checkpoint()?;
            let version = installer.read_version(&artifact).await?;
            verify_version(&version)?;
            Ok(version)
        })
    };

    let patch = {
        let request = request.clone();
        verify.then(format!("patch {label}"), move |version: Value, _cx| async move {
            let default_id = installer.default_version_id(&request);
            patch_version(version, &request, default_id)
        })
    };

    let libraries = {
        let ctx = ctx.clone();
        let libraries_dir = request.game_dir.join("libraries");
        let label = label.clone();
        patch.then_compose(format!("libraries {label}"), move |metadata: VersionMetadata, _cx| {
            let descriptors = library_downloads(&metadata.json, &libraries_dir)?;
            let batch = DownloadTask::batch(&ctx, format!("download libraries {label}"), descriptors);
            Ok(batch
                .then(format!("libraries ready {label}"), move |_paths, _cx| async move {
                    Ok(metadata)
                })
                .quiet())
        })
    };

    let game_dir = request.game_dir;
    let write = libraries.then(format!("write {label}"), move |metadata: VersionMetadata, cx| async move {
        cx.checkpoint()?;
        write_version(&game_dir, &metadata).await
    });

    Ok(write)
}

/// A usable version JSON names a main class and only well-formed libraries.
fn verify_version(version: &Value) -> EngineResult<()> {
    let main_class = version
        .get("mainClass")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if main_class.trim().is_empty() {
        return Err(EngineError::Installer("version metadata has no mainClass".into()));
    }

    if let Some(libraries) = version.get("libraries").and_then(Value::as_array) {
        for library in libraries {
            let Some(name) = library.get("name").and_then(Value::as_str) else {
                return Err(EngineError::Installer(format!("library without a name: {library}")));
            };
            MavenArtifact::parse(name)?;
        }
    }
    Ok(())
}

/// One download per library that names where to get it: either a
/// `downloads.artifact` entry or a repository `url` plus its coordinate.
/// Artifacts without a URL are generated by installer processors and
/// libraries without any location belong to the base game; both are skipped.
fn library_downloads(version: &Value, libraries_dir: &Path) -> EngineResult<Vec<DownloadDescriptor>> {
    let Some(libraries) = version.get("libraries").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut descriptors = Vec::new();
    for library in libraries {
        let Some(name) = library.get("name").and_then(Value::as_str) else {
            continue;
        };
        let artifact = MavenArtifact::parse(name)?;

        let (url, path, listed) = match library.pointer("/downloads/artifact") {
            Some(entry) => {
                let url = entry.get("url").and_then(Value::as_str).unwrap_or_default();
                if url.is_empty() {
                    continue;
                }
                let path = entry
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| artifact.library_path());
                (url.to_string(), path, entry)
            }
            None => match library.get("url").and_then(Value::as_str) {
                Some(repo) => (artifact.url(repo), artifact.library_path(), library),
                None => continue,
            },
        };
        if !seen.insert(path.clone()) {
            continue;
        }

        let mut descriptor = DownloadDescriptor::builder(libraries_dir.join(&path)).url(url);
        if let Some(sha1) = listed.get("sha1").and_then(Value::as_str) {
            descriptor = descriptor.checksum(Checksum::sha1(sha1)?);
        }
        if let Some(size) = listed.get("size").and_then(Value::as_u64) {
            descriptor = descriptor.size(size);
        }
        descriptors.push(descriptor.build()?);
    }
    Ok(descriptors)
}

/// Sets `id`, and points the version at the game version it extends.
fn patch_version(
    mut version: Value,
    request: &InstallRequest,
    default_id: String,
) -> EngineResult<VersionMetadata> {
    let Some(object) = version.as_object_mut() else {
        return Err(EngineError::Installer("version metadata is not an object".into()));
    };

    let id = request.version_id.clone().unwrap_or(default_id);
    object.insert("id".into(), Value::String(id.clone()));
    object.insert(
        "inheritsFrom".into(),
        Value::String(request.minecraft_version.clone()),
    );
    object
        .entry("jar")
        .or_insert_with(|| Value::String(request.minecraft_version.clone()));
    object.remove("_comment_");

    Ok(VersionMetadata { id, json: version })
}

async fn write_version(game_dir: &Path, metadata: &VersionMetadata) -> EngineResult<PathBuf> {
    let dir = game_dir.join("versions").join(&metadata.id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| EngineError::io(&dir, e))?;

    let path = dir.join(format!("{}.json", metadata.id));
    let tmp = dir.join(format!(".{}.json.tmp", metadata.id));
    let json = serde_json::to_string_pretty(&metadata.json)?;
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| EngineError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| EngineError::io(&path, e))?;

    info!("Installed version {} at {:?}", metadata.id, path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::downloader::test_helpers::ScriptedTransport;
    use crate::core::downloader::{digest_bytes, HashAlgorithm};
    use crate::core::loaders::forge::tests::installer_jar;
    use crate::core::loaders::InstallerKind;
    use crate::core::state::EngineSettings;
    use crate::core::task::TaskState;

    const FORGE_URL: &str = "https://maven.minecraftforge.net/net/minecraftforge/forge/1.20.1-47.2.0/forge-1.20.1-47.2.0-installer.jar";
    const FORGE_VERSION: &str = r#"{
        "_comment_": ["generated"],
        "id": "1.20.1-forge-47.2.0",
        "inheritsFrom": "1.20.1",
        "mainClass": "cpw.mods.bootstraplauncher.BootstrapLauncher",
        "libraries": [{"name": "net.minecraftforge:fmlloader:1.20.1-47.2.0"}]
    }"#;

    struct Setup {
        dir: tempfile::TempDir,
        ctx: EngineContext,
        transport: Arc<ScriptedTransport>,
    }

    fn setup(transport: ScriptedTransport) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(transport);
        let ctx = EngineContext::with_transport(
            EngineSettings::in_dir(dir.path().join("data")),
            transport.clone(),
        )
        .unwrap();
        Setup { dir, ctx, transport }
    }

    impl Setup {
        fn game_dir(&self) -> PathBuf {
            self.dir.path().join("game")
        }

        fn request(&self, kind: InstallerKind, loader: &str) -> InstallRequest {
            InstallRequest::new(kind, "1.20.1", loader, self.game_dir())
        }
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn forge_chain_writes_patched_version() {
        let jar = installer_jar(&[("version.json", FORGE_VERSION)]);
        let s = setup(ScriptedTransport::new().with_bytes(FORGE_URL, jar));

        let task = install_chain(&s.ctx, s.request(InstallerKind::Forge, "47.2.0")).unwrap();
        let report = s.ctx.scheduler().run(task).await.unwrap();

        assert_eq!(report.state, TaskState::Succeeded);
        let path = report.result.unwrap();
        assert_eq!(
            path,
            s.game_dir().join("versions/1.20.1-forge-47.2.0/1.20.1-forge-47.2.0.json")
        );
        let written = read_json(&path);
        assert_eq!(written["inheritsFrom"], "1.20.1");
        assert_eq!(written["jar"], "1.20.1");
        assert!(written.get("_comment_").is_none());
    }

    #[tokio::test]
    async fn custom_version_id_names_the_folder() {
        let jar = installer_jar(&[("version.json", FORGE_VERSION)]);
        let s = setup(ScriptedTransport::new().with_bytes(FORGE_URL, jar));
        let request = s
            .request(InstallerKind::Forge, "47.2.0")
            .with_version_id("Modded Survival");

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, request).unwrap())
            .await
            .unwrap();

        let path = report.into_result().unwrap();
        assert!(path.ends_with("versions/Modded Survival/Modded Survival.json"));
        assert_eq!(read_json(&path)["id"], "Modded Survival");
    }

    #[tokio::test]
    async fn failed_verification_stops_before_anything_is_written() {
        let jar = installer_jar(&[("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n")]);
        let s = setup(ScriptedTransport::new().with_bytes(FORGE_URL, jar));

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::Forge, "47.2.0")).unwrap())
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(matches!(report.root_cause(), Some(EngineError::Installer(_))));
        assert!(!s.game_dir().join("versions").exists());
    }

    #[tokio::test]
    async fn unreachable_installer_reports_the_transport_cause() {
        let s = setup(ScriptedTransport::new());

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::Forge, "47.2.0")).unwrap())
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(matches!(
            report.root_cause(),
            Some(EngineError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(s.transport.calls(), vec![FORGE_URL.to_string()]);
    }

    #[tokio::test]
    async fn neoforge_uses_legacy_coordinate_when_current_is_missing() {
        let legacy = "https://maven.neoforged.net/releases/net/neoforged/forge/1.20.1-47.1.106/forge-1.20.1-47.1.106-installer.jar";
        let jar = installer_jar(&[(
            "version.json",
            r#"{"id":"1.20.1-forge-47.1.106","mainClass":"cpw.mods.bootstraplauncher.BootstrapLauncher"}"#,
        )]);
        let s = setup(ScriptedTransport::new().with_bytes(legacy, jar));

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::NeoForge, "47.1.106")).unwrap())
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(s.transport.calls().len(), 2);
        assert!(report
            .result
            .unwrap()
            .ends_with("versions/neoforge-47.1.106/neoforge-47.1.106.json"));
    }

    #[tokio::test]
    async fn fabric_profile_installs_its_libraries() {
        let url = "https://meta.fabricmc.net/v2/versions/loader/1.20.1/0.15.11/profile/json";
        let loader = "https://maven.fabricmc.net/net/fabricmc/fabric-loader/0.15.11/fabric-loader-0.15.11.jar";
        let profile = r#"{
            "id": "fabric-loader-0.15.11-1.20.1",
            "inheritsFrom": "1.20.1",
            "mainClass": "net.fabricmc.loader.impl.launch.knot.KnotClient",
            "libraries": [{"name": "net.fabricmc:fabric-loader:0.15.11", "url": "https://maven.fabricmc.net/"}]
        }"#;
        let s = setup(
            ScriptedTransport::new()
                .with_bytes(url, profile.as_bytes().to_vec())
                .with_bytes(loader, b"loader-jar".to_vec()),
        );

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::Fabric, "0.15.11")).unwrap())
            .await
            .unwrap();

        assert!(report.succeeded());
        let written = read_json(&report.result.unwrap());
        assert_eq!(
            written["mainClass"],
            "net.fabricmc.loader.impl.launch.knot.KnotClient"
        );
        let jar = s
            .game_dir()
            .join("libraries/net/fabricmc/fabric-loader/0.15.11/fabric-loader-0.15.11.jar");
        assert_eq!(std::fs::read(jar).unwrap(), b"loader-jar");
        assert_eq!(s.transport.calls(), vec![url.to_string(), loader.to_string()]);
    }

    #[tokio::test]
    async fn listed_library_artifacts_are_downloaded_and_verified() {
        let lib_url = "https://maven.minecraftforge.net/net/minecraftforge/fmlcore/1.20.1-47.2.0/fmlcore-1.20.1-47.2.0.jar";
        let version = format!(
            r#"{{
                "mainClass": "cpw.mods.bootstraplauncher.BootstrapLauncher",
                "libraries": [
                    {{"name": "net.minecraftforge:fmlcore:1.20.1-47.2.0",
                      "downloads": {{"artifact": {{
                          "path": "net/minecraftforge/fmlcore/1.20.1-47.2.0/fmlcore-1.20.1-47.2.0.jar",
                          "url": "{lib_url}",
                          "sha1": "{sha1}",
                          "size": 8}}}}}},
                    {{"name": "net.minecraftforge:forge:1.20.1-47.2.0:client",
                      "downloads": {{"artifact": {{"path": "x.jar", "url": ""}}}}}}
                ]
            }}"#,
            sha1 = digest_bytes(HashAlgorithm::Sha1, b"fml-core"),
        );
        let jar = installer_jar(&[("version.json", version.as_str())]);
        let s = setup(
            ScriptedTransport::new()
                .with_bytes(FORGE_URL, jar)
                .with_bytes(lib_url, b"fml-core".to_vec()),
        );

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::Forge, "47.2.0")).unwrap())
            .await
            .unwrap();

        assert!(report.succeeded());
        let lib = s
            .game_dir()
            .join("libraries/net/minecraftforge/fmlcore/1.20.1-47.2.0/fmlcore-1.20.1-47.2.0.jar");
        assert_eq!(std::fs::read(lib).unwrap(), b"fml-core");
        assert!(!s.game_dir().join("libraries/x.jar").exists());
        assert_eq!(s.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn missing_library_fails_the_install_before_the_version_is_written() {
        let profile_url = "https://meta.quiltmc.org/v3/versions/loader/1.20.1/0.26.0/profile/json";
        let profile = r#"{
            "mainClass": "org.quiltmc.loader.impl.launch.knot.KnotClient",
            "libraries": [{"name": "org.quiltmc:quilt-loader:0.26.0", "url": "https://maven.quiltmc.org/repository/release/"}]
        }"#;
        let s = setup(ScriptedTransport::new().with_bytes(profile_url, profile.as_bytes().to_vec()));

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::Quilt, "0.26.0")).unwrap())
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(matches!(
            report.root_cause(),
            Some(EngineError::HttpStatus { status: 404, .. })
        ));
        assert!(!s.game_dir().join("versions").exists());
    }

    #[tokio::test]
    async fn profile_without_main_class_is_rejected() {
        let url = "https://meta.quiltmc.org/v3/versions/loader/1.20.1/0.26.0/profile/json";
        let s = setup(ScriptedTransport::new().with_bytes(url, br#"{"id":"x","libraries":[]}"#.to_vec()));

        let report = s
            .ctx
            .scheduler()
            .run(install_chain(&s.ctx, s.request(InstallerKind::Quilt, "0.26.0")).unwrap())
            .await
            .unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert!(report
            .root_cause()
            .unwrap()
            .to_string()
            .contains("mainClass"));
    }

    #[test]
    fn libraries_without_a_location_are_left_to_the_base_game() {
        let version: Value = serde_json::from_str(
            r#"{"libraries":[
                {"name":"com.mojang:logging:1.1.1"},
                {"name":"org.ow2.asm:asm:9.6","url":"https://maven.fabricmc.net/"},
                {"name":"org.ow2.asm:asm:9.6","url":"https://maven.fabricmc.net/"}
            ]}"#,
        )
        .unwrap();

        let descriptors = library_downloads(&version, Path::new("/game/libraries")).unwrap();

        assert_eq!(descriptors.len(), 1);
        assert_eq!(
            descriptors[0].urls(),
            ["https://maven.fabricmc.net/org/ow2/asm/asm/9.6/asm-9.6.jar"]
        );
        assert_eq!(
            descriptors[0].dest(),
            Path::new("/game/libraries/org/ow2/asm/asm/9.6/asm-9.6.jar")
        );
    }

    #[test]
    fn malformed_library_names_fail_verification() {
        let version: Value = serde_json::from_str(
            r#"{"mainClass":"a.B","libraries":[{"name":"not-a-coordinate"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            verify_version(&version),
            Err(EngineError::InvalidMavenCoordinate(_))
        ));
    }
}
