use crate::error::{PrefgenError, PrefgenResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Filesystem layout of one run's save directory.
///
/// Default location is `<output_dir>/<dataset>-<prompt_format>/`, or the
/// evaluation directory when an existing checkpoint is evaluated.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

/// Which split an augmentation pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentSplit {
    Test,
    Val,
}

impl AugmentSplit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Val => "val",
        }
    }
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `pred_pre_test.json` / `pred_pre_val.json`
    #[must_use]
    pub fn predictions_path(&self, split: AugmentSplit) -> PathBuf {
        self.root.join(format!("pred_pre_{}.json", split.as_str()))
    }

    /// `test_new.json` / `val_new.json`
    #[must_use]
    pub fn augmented_records_path(&self, split: AugmentSplit) -> PathBuf {
        self.root.join(format!("{}_new.json", split.as_str()))
    }

    #[must_use]
    pub fn metrics_path(&self, split: &str) -> PathBuf {
        self.root.join(format!("{split}_results.json"))
    }

    #[must_use]
    pub fn run_manifest_path(&self) -> PathBuf {
        self.root.join("run_manifest.json")
    }

    #[must_use]
    pub fn checkpoint_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!("checkpoint-{step}"))
    }

    pub fn ensure_root(&self) -> PrefgenResult<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|source| PrefgenError::Persistence { path: self.root.clone(), source })
    }
}

/// Serialize `value` with four-space indentation and write it in one call.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> PrefgenResult<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    std::fs::write(path, buf).map_err(|source| PrefgenError::Persistence { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = RunLayout::new(PathBuf::from("experiments/ml-100k-REC-P"));
        assert!(layout.predictions_path(AugmentSplit::Test).ends_with("pred_pre_test.json"));
        assert!(layout.augmented_records_path(AugmentSplit::Val).ends_with("val_new.json"));
        assert!(layout.metrics_path("test").ends_with("test_results.json"));
        assert!(layout.checkpoint_dir(40).ends_with("checkpoint-40"));
    }

    #[test]
    fn test_write_json_pretty_indents_four_spaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("x.json");
        write_json_pretty(&path, &serde_json::json!({"preds": ["a"]})).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"preds\": [\n        \"a\"\n    ]"));
    }

    #[test]
    fn test_write_into_missing_dir_is_persistence_error() {
        let temp = TempDir::new().unwrap();
        let err = write_json_pretty(&temp.path().join("nope/x.json"), &1).unwrap_err();
        assert!(matches!(err, PrefgenError::Persistence { .. }));
    }
}
