//! Shared fixtures for prefgen-training integration tests.
//!
//! Provides a small on-disk dataset and an identity trainer whose
//! predictions are exactly the labels it is asked about.

#![allow(dead_code)]

use async_trait::async_trait;
use prefgen_training::layout::write_json_pretty;
use prefgen_training::{
    EncodedDataset, Metrics, PredictionOutput, Predictions, PreferenceLabel, PrefgenResult, PromptFormat, Record,
    RunConfig, RunLayout, Seq2SeqBackend, Seq2SeqTrainer, Tokenizer, TrainOutput, TrainerSetup,
    EvalPrediction, ByteTokenizer,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const DATASET: &str = "ml-100k";

pub fn record(qid: &str, preference: &str, label: PreferenceLabel) -> Record {
    Record::new(qid, vec!["Toy Story (1995)".to_string(), "Heat (1995)".to_string()], &format!("Candidate {qid}"), label)
        .with_preference(preference)
}

/// Records `a`, `b`, `c` with distinct preferences.
pub fn abc_records() -> Vec<Record> {
    vec![
        record("a", "The user enjoys animated family films.", PreferenceLabel::Yes),
        record("b", "The user avoids slow crime dramas.", PreferenceLabel::No),
        record("c", "The user likes classic romance.", PreferenceLabel::Yes),
    ]
}

/// Write `train.json`, `val.json` and `test.json` under `<root>/data/ml-100k/`.
pub fn write_dataset(root: &Path, train: &[Record], val: &[Record], test: &[Record]) {
    let dir = root.join("data").join(DATASET);
    std::fs::create_dir_all(&dir).unwrap();
    for (stem, records) in [("train", train), ("val", val), ("test", test)] {
        write_json_pretty(&dir.join(format!("{stem}.json")), records).unwrap();
    }
}

/// Temp workspace holding the `abc` dataset in every split.
pub fn abc_workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_dataset(temp.path(), &abc_records(), &abc_records(), &abc_records());
    temp
}

pub fn config(root: &Path, format: PromptFormat) -> RunConfig {
    RunConfig {
        data_dir: root.join("data"),
        output_dir: root.join("experiments"),
        epoch: 2,
        bs: 2,
        eval_bs: 2,
        input_len: 256,
        output_len: 64,
        prompt_format: format,
        process_rank: Some(0),
        ..RunConfig::default()
    }
}

/// Backend whose trainer predicts every reference exactly.
#[derive(Debug, Default)]
pub struct EchoBackend {
    /// Skip the trainer's own rank check in `save_model`/`save_metrics`.
    pub ungated_writes: bool,
}

#[async_trait]
impl Seq2SeqBackend for EchoBackend {
    fn id(&self) -> &'static str {
        "echo"
    }

    fn load_tokenizer(&self, _model: &str) -> PrefgenResult<Arc<dyn Tokenizer>> {
        Ok(Arc::new(ByteTokenizer))
    }

    async fn build_trainer(&self, setup: TrainerSetup) -> PrefgenResult<Box<dyn Seq2SeqTrainer>> {
        let rank = setup.args.process_rank.unwrap_or(0);
        Ok(Box::new(EchoTrainer {
            layout: RunLayout::new(setup.args.output_dir.clone()),
            setup,
            rank,
            ungated_writes: self.ungated_writes,
        }))
    }
}

pub struct EchoTrainer {
    setup: TrainerSetup,
    layout: RunLayout,
    rank: usize,
    ungated_writes: bool,
}

impl EchoTrainer {
    fn may_write(&self) -> bool {
        self.ungated_writes || self.is_world_process_zero()
    }

    fn label_ids(&self, dataset: &EncodedDataset) -> Vec<Vec<i64>> {
        let examples: Vec<_> = dataset.iter().collect();
        self.setup.collator.collate(&examples).labels
    }
}

#[async_trait]
impl Seq2SeqTrainer for EchoTrainer {
    fn id(&self) -> &'static str {
        "echo"
    }

    fn num_parameters(&self) -> usize {
        0
    }

    fn is_world_process_zero(&self) -> bool {
        self.rank == 0
    }

    async fn train(&mut self) -> PrefgenResult<TrainOutput> {
        Ok(TrainOutput { epochs_completed: self.setup.args.num_train_epochs, ..TrainOutput::default() })
    }

    async fn evaluate(&mut self, dataset: &EncodedDataset, _max_length: usize) -> PrefgenResult<Metrics> {
        let label_ids = self.label_ids(dataset);
        let mut metrics = Metrics::from([("eval_loss".to_string(), 0.0)]);
        if let Some(callback) = &self.setup.compute_metrics {
            let scored = callback.compute(EvalPrediction { predictions: Predictions::TokenIds(label_ids.clone()), label_ids })?;
            metrics.extend(scored.into_iter().map(|(k, v)| (format!("eval_{k}"), v)));
        }
        Ok(metrics)
    }

    async fn predict(&mut self, dataset: &EncodedDataset, _max_length: usize) -> PrefgenResult<PredictionOutput> {
        let label_ids = self.label_ids(dataset);
        Ok(PredictionOutput { predictions: Predictions::TokenIds(label_ids.clone()), label_ids, metrics: Metrics::new() })
    }

    async fn save_model(&self, dir: &Path) -> PrefgenResult<()> {
        if self.may_write() {
            std::fs::create_dir_all(dir)?;
            write_json_pretty(&dir.join("echo_model.json"), &serde_json::json!({ "model": self.setup.model }))?;
        }
        Ok(())
    }

    fn save_metrics(&self, split: &str, metrics: &Metrics) -> PrefgenResult<()> {
        if self.may_write() {
            self.layout.ensure_root()?;
            write_json_pretty(&self.layout.metrics_path(split), metrics)?;
        }
        Ok(())
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
