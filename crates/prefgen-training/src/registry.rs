use crate::artifacts::RunManifest;
use crate::error::PrefgenResult;
use crate::layout::RunLayout;
use std::path::{Path, PathBuf};

/// A finished run found under an output directory.
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub save_dir: PathBuf,
    pub manifest: RunManifest,
}

fn read_manifest(path: &Path) -> PrefgenResult<RunManifest> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<RunManifest>(&bytes)?)
}

/// Discover runs by scanning `<output_dir>/*/run_manifest.json`, newest first.
pub fn discover_runs(output_dir: &Path) -> PrefgenResult<Vec<RunEntry>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(output_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let save_dir = entry.path();
        if !save_dir.is_dir() {
            continue;
        }
        let manifest_path = RunLayout::new(save_dir.clone()).run_manifest_path();
        if !manifest_path.exists() {
            continue;
        }
        let manifest = read_manifest(&manifest_path)?;
        out.push(RunEntry { save_dir, manifest });
    }

    out.sort_by(|a, b| b.manifest.created_at.cmp(&a.manifest.created_at));
    Ok(out)
}
