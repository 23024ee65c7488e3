mod chain;
pub mod context;
pub mod fabric;
pub mod forge;
pub mod installer;
pub mod neoforge;
pub mod quilt;

pub use chain::{install_chain, VersionMetadata};
pub use context::InstallRequest;
pub use installer::{ArtifactSource, Installer, InstallerKind, LoaderInstaller};
