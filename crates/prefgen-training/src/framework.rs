//! Seams to the external training framework.
//!
//! The orchestrator configures a [`Seq2SeqBackend`] with [`TrainingArguments`]
//! and receives a [`Seq2SeqTrainer`] it drives through train → evaluate →
//! predict. Everything in here is backend-agnostic.

use crate::collator::Seq2SeqCollator;
use crate::encoding::EncodedDataset;
use crate::error::{PrefgenError, PrefgenResult};
use crate::progress::ProgressSink;
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metric name → value. Ordered so persisted metric files are stable.
pub type Metrics = BTreeMap<String, f64>;

/// When the framework evaluates or saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStrategy {
    No,
    Epoch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArguments {
    pub output_dir: PathBuf,
    pub overwrite_output_dir: bool,
    pub do_train: bool,
    pub do_eval: bool,
    pub evaluation_strategy: IntervalStrategy,
    pub save_strategy: IntervalStrategy,
    pub save_total_limit: usize,
    pub learning_rate: f64,
    pub eval_accumulation_steps: Option<usize>,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub weight_decay: f64,
    pub num_train_epochs: u32,
    /// Metric used to select the best checkpoint (`eval_` prefix optional).
    pub metric_for_best_model: Option<String>,
    pub greater_is_better: bool,
    pub load_best_model_at_end: bool,
    pub predict_with_generate: bool,
    pub generation_max_length: usize,
    pub seed: u64,
    pub process_rank: Option<usize>,
}

impl TrainingArguments {
    /// `metric_for_best_model` with the `eval_` prefix the framework reports.
    #[must_use]
    pub fn best_metric_key(&self) -> Option<String> {
        self.metric_for_best_model.as_deref().map(|m| {
            if m.starts_with("eval_") { m.to_string() } else { format!("eval_{m}") }
        })
    }
}

/// Raw model output for an evaluation batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Token ids from free generation.
    TokenIds(Vec<Vec<i64>>),
    /// Per-position scores over the vocabulary `[batch, position, vocab]`.
    Logits(Vec<Vec<Vec<f32>>>),
    /// Primary output first, auxiliary outputs after.
    Tuple(Vec<Predictions>),
}

impl Predictions {
    /// Reduce to one token id per position: first element of a tuple, arg-max of logits.
    pub fn into_token_ids(self) -> PrefgenResult<Vec<Vec<i64>>> {
        match self {
            Self::TokenIds(ids) => Ok(ids),
            Self::Logits(batch) => batch
                .into_iter()
                .map(|seq| seq.iter().map(|scores| argmax(scores)).collect::<PrefgenResult<Vec<_>>>())
                .collect(),
            Self::Tuple(parts) => parts
                .into_iter()
                .next()
                .ok_or_else(|| PrefgenError::decode("empty prediction tuple"))?
                .into_token_ids(),
        }
    }
}

fn argmax(scores: &[f32]) -> PrefgenResult<i64> {
    let (best, _) = scores
        .iter()
        .enumerate()
        .fold(None::<(usize, f32)>, |acc, (i, &v)| match acc {
            Some((_, best)) if best.total_cmp(&v).is_ge() => acc,
            _ => Some((i, v)),
        })
        .ok_or_else(|| PrefgenError::decode("logits row has no vocabulary entries"))?;
    i64::try_from(best).map_err(|_| PrefgenError::decode("vocabulary index overflows i64"))
}

/// What the metric callback receives at an evaluation point.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalPrediction {
    pub predictions: Predictions,
    pub label_ids: Vec<Vec<i64>>,
}

pub trait MetricCallback: Send + Sync {
    fn compute(&self, eval: EvalPrediction) -> PrefgenResult<Metrics>;
}

/// Stop when the selection metric has not improved for `patience` evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingCallback {
    pub patience: usize,
    pub threshold: f64,
}

impl EarlyStoppingCallback {
    #[must_use]
    pub fn new(patience: usize) -> Self {
        Self { patience, threshold: 0.0 }
    }

    #[must_use]
    pub fn tracker(&self, greater_is_better: bool) -> EarlyStoppingTracker {
        EarlyStoppingTracker { config: *self, greater_is_better, best: None, rounds_without_improvement: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct EarlyStoppingTracker {
    config: EarlyStoppingCallback,
    greater_is_better: bool,
    best: Option<f64>,
    rounds_without_improvement: usize,
}

impl EarlyStoppingTracker {
    /// Record one evaluation. Returns `true` when training should stop.
    pub fn observe(&mut self, value: f64) -> bool {
        let improved = match self.best {
            None => true,
            Some(best) if self.greater_is_better => value > best + self.config.threshold,
            Some(best) => value < best - self.config.threshold,
        };
        if improved {
            self.best = Some(value);
            self.rounds_without_improvement = 0;
        } else {
            self.rounds_without_improvement += 1;
        }
        self.rounds_without_improvement >= self.config.patience
    }

    #[must_use]
    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

/// Everything a backend needs to build a trainer.
#[derive(Clone)]
pub struct TrainerSetup {
    /// Model identifier or checkpoint directory.
    pub model: String,
    pub args: TrainingArguments,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub train_dataset: Arc<EncodedDataset>,
    pub eval_dataset: Arc<EncodedDataset>,
    pub collator: Seq2SeqCollator,
    pub compute_metrics: Option<Arc<dyn MetricCallback>>,
    pub callbacks: Vec<EarlyStoppingCallback>,
    pub progress: Arc<dyn ProgressSink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainOutput {
    pub global_step: u64,
    pub training_loss: f64,
    pub epochs_completed: u32,
    pub stopped_early: bool,
    pub best_checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub predictions: Predictions,
    pub label_ids: Vec<Vec<i64>>,
    pub metrics: Metrics,
}

#[async_trait]
pub trait Seq2SeqTrainer: Send + Sync {
    fn id(&self) -> &'static str;

    fn num_parameters(&self) -> usize;

    /// True on the one process allowed to write files.
    fn is_world_process_zero(&self) -> bool;

    async fn train(&mut self) -> PrefgenResult<TrainOutput>;

    /// Metrics are keyed with the `eval_` prefix.
    async fn evaluate(&mut self, dataset: &EncodedDataset, max_length: usize) -> PrefgenResult<Metrics>;

    async fn predict(&mut self, dataset: &EncodedDataset, max_length: usize) -> PrefgenResult<PredictionOutput>;

    async fn save_model(&self, dir: &Path) -> PrefgenResult<()>;

    fn log_metrics(&self, split: &str, metrics: &Metrics) {
        for (key, value) in metrics {
            tracing::info!(split, metric = %key, value, "{split} metric");
        }
    }

    /// Write `<split>_results.json` into the output directory.
    fn save_metrics(&self, split: &str, metrics: &Metrics) -> PrefgenResult<()>;
}

#[async_trait]
pub trait Seq2SeqBackend: Send + Sync {
    fn id(&self) -> &'static str;

    fn load_tokenizer(&self, model: &str) -> PrefgenResult<Arc<dyn Tokenizer>>;

    async fn build_trainer(&self, setup: TrainerSetup) -> PrefgenResult<Box<dyn Seq2SeqTrainer>>;
}
