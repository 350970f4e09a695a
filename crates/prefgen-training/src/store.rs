//! Train/validation/test record collections for a named dataset.
//!
//! Layout: `<data_dir>/<dataset>/<split>.json`, each file a JSON array of
//! [`Record`]s. Record order is kept exactly as stored.

use crate::config::RunConfig;
use crate::error::{PrefgenError, PrefgenResult};
use crate::record::Record;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ExampleStore {
    root: PathBuf,
}

/// The three collections a run works on.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: Vec<Record>,
    pub val: Vec<Record>,
    pub test: Vec<Record>,
}

impl ExampleStore {
    #[must_use]
    pub fn new(data_dir: &Path, dataset: &str) -> Self {
        Self { root: data_dir.join(dataset) }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn split_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}.json"))
    }

    /// Load one split by file stem.
    pub fn load_split(&self, stem: &str) -> PrefgenResult<Vec<Record>> {
        let path = self.split_path(stem);
        let records = read_records(&path)?;
        if records.is_empty() {
            return Err(PrefgenError::config(format!("split '{stem}' is empty: {}", path.display())));
        }
        Ok(records)
    }

    /// Load the splits selected by `config`, merging earlier-stage rationales
    /// from `eval_le` / `test_le` when given.
    pub fn load(config: &RunConfig) -> PrefgenResult<DatasetSplits> {
        let store = Self::new(&config.data_dir, &config.dataset);
        let train = store.load_split(config.train_split.file_stem())?;
        let mut val = store.load_split(config.val_split.file_stem())?;
        let mut test = store.load_split(config.test_split.file_stem())?;

        if let Some(path) = &config.eval_le {
            let merged = merge_generated_preferences(&mut val, &read_records(path)?);
            tracing::info!(path = %path.display(), merged, "merged generated preferences into val split");
        }
        if let Some(path) = &config.test_le {
            let merged = merge_generated_preferences(&mut test, &read_records(path)?);
            tracing::info!(path = %path.display(), merged, "merged generated preferences into test split");
        }

        tracing::info!(train = train.len(), val = val.len(), test = test.len(), "loaded dataset '{}'", config.dataset);
        Ok(DatasetSplits { train, val, test })
    }
}

/// Read a record collection and check that qids are unique.
pub fn read_records(path: &Path) -> PrefgenResult<Vec<Record>> {
    let bytes = std::fs::read(path).map_err(|e| {
        PrefgenError::config(format!("missing split data {}: {e}", path.display()))
    })?;
    let records: Vec<Record> = serde_json::from_slice(&bytes).map_err(|e| {
        PrefgenError::config(format!("failed to parse records in {}: {e}", path.display()))
    })?;

    let mut seen = HashSet::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        if !seen.insert(record.qid.key()) {
            return Err(PrefgenError::config(format!(
                "duplicate qid '{}' at record[{idx}] in {}",
                record.qid,
                path.display()
            )));
        }
    }
    Ok(records)
}

/// Copy `pred_preference` from `source` into `records` by qid.
///
/// Returns how many records received a value. Records without a match keep
/// whatever they had.
pub fn merge_generated_preferences(records: &mut [Record], source: &[Record]) -> usize {
    let by_id: HashMap<String, &str> = source
        .iter()
        .filter_map(|r| r.pred_preference.as_deref().map(|p| (r.qid.key(), p)))
        .collect();

    let mut merged = 0;
    for record in records.iter_mut() {
        if let Some(pred) = by_id.get(&record.qid.key()) {
            record.pred_preference = Some((*pred).to_string());
            merged += 1;
        }
    }
    merged
}
