use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{EngineError, EngineResult};

/// A Maven coordinate as loader metadata names libraries and installers:
/// `group:artifact:version[:classifier][@extension]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MavenArtifact {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub classifier: Option<String>,
    /// Extension after `@`; `jar` when absent.
    pub packaging: String,
}

impl MavenArtifact {
    /// ```
    /// use launcher_engine::core::maven::MavenArtifact;
    ///
    /// let a = MavenArtifact::parse("net.minecraftforge:forge:1.20.1-47.2.0:installer").unwrap();
    /// assert_eq!(a.filename(), "forge-1.20.1-47.2.0-installer.jar");
    /// ```
    pub fn parse(coord: &str) -> EngineResult<Self> {
        let invalid = || EngineError::InvalidMavenCoordinate(coord.to_string());
        let (names, packaging) = match coord.split_once('@') {
            Some((names, ext)) if !ext.trim().is_empty() => (names, ext),
            Some(_) => return Err(invalid()),
            None => (coord, "jar"),
        };

        let fields: Vec<&str> = names.split(':').map(str::trim).collect();
        if fields.iter().any(|field| field.is_empty()) {
            return Err(invalid());
        }
        let (group, artifact, version, classifier) = match fields.as_slice() {
            [group, artifact, version] => (group, artifact, version, None),
            [group, artifact, version, classifier] => (group, artifact, version, Some(*classifier)),
            _ => return Err(invalid()),
        };

        Ok(Self {
            group_id: group.to_string(),
            artifact_id: artifact.to_string(),
            version: version.to_string(),
            classifier: classifier.map(str::to_string),
            packaging: packaging.to_string(),
        })
    }

    /// `net.fabricmc` becomes `net/fabricmc`.
    pub fn group_path(&self) -> String {
        self.group_id.split('.').collect::<Vec<_>>().join("/")
    }

    /// `artifact-version[-classifier].extension`
    pub fn filename(&self) -> String {
        let mut stem = vec![self.artifact_id.as_str(), self.version.as_str()];
        stem.extend(self.classifier.as_deref());
        format!("{}.{}", stem.join("-"), self.packaging)
    }

    /// Path below a repository root, `/`-separated.
    pub fn library_path(&self) -> String {
        [
            self.group_path(),
            self.artifact_id.clone(),
            self.version.clone(),
            self.filename(),
        ]
        .join("/")
    }

    pub fn url(&self, repo_base: &str) -> String {
        format!("{}/{}", repo_base.trim_end_matches('/'), self.library_path())
    }

    /// The `installer` classified jar of the same coordinate.
    pub fn installer(&self) -> Self {
        Self {
            classifier: Some("installer".to_string()),
            packaging: "jar".to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for MavenArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        write!(f, "@{}", self.packaging)
    }
}
