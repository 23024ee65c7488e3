mod artifact;

pub use artifact::MavenArtifact;

/// Repositories and metadata services the installers fetch from.
pub const FORGE_MAVEN: &str = "https://maven.minecraftforge.net";
pub const NEOFORGE_MAVEN: &str = "https://maven.neoforged.net/releases";
pub const FABRIC_META: &str = "https://meta.fabricmc.net/v2";
pub const QUILT_META: &str = "https://meta.quiltmc.org/v3";

/// Community mirrors, tried after the official source when mirrors are enabled.
pub const BMCLAPI_MAVEN: &str = "https://bmclapi2.bangbang93.com/maven";
pub const BMCLAPI_FABRIC_META: &str = "https://bmclapi2.bangbang93.com/fabric-meta/v2";
