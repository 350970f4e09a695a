use crate::config::{PromptFormat, TrainingMode};
use crate::error::{PrefgenError, PrefgenResult};
use crate::framework::Metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Predictions,
    AugmentedRecords,
    Metrics,
    Checkpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub dataset: String,
    pub prompt_format: PromptFormat,
    pub mode: TrainingMode,
    pub model: String,
    pub trained: bool,
    #[serde(default)]
    pub test_metrics: Metrics,
    pub artifacts: Vec<RunArtifact>,
}

pub fn sha256_file(path: &Path) -> PrefgenResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> PrefgenResult<RunArtifact> {
    if !path.exists() {
        return Err(PrefgenError::Framework(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(RunArtifact { kind, path, sha256: hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_make_artifact_hashes_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        std::fs::write(&path, "abc").unwrap();
        let artifact = make_artifact(ArtifactKind::Predictions, path).unwrap();
        assert_eq!(artifact.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_make_artifact_requires_existing_file() {
        let temp = TempDir::new().unwrap();
        assert!(make_artifact(ArtifactKind::Metrics, temp.path().join("missing.json")).is_err());
    }
}
