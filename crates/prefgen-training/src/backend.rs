//! Retrieval-based reference backend.
//!
//! A minimal local seq2seq "model": training memorises (input, label) pairs,
//! prediction returns the labels of the most similar memorised input
//! (Jaccard similarity over input-id bigrams). Each epoch memorises another
//! slice of the shuffled training set, so per-epoch evaluation, checkpoint
//! selection and early stopping all have something to observe.

use crate::collator::CollatedBatch;
use crate::encoding::{EncodedDataset, EncodedExample};
use crate::error::{PrefgenError, PrefgenResult};
use crate::framework::{
    EarlyStoppingTracker, EvalPrediction, IntervalStrategy, Metrics, PredictionOutput, Predictions,
    Seq2SeqBackend, Seq2SeqTrainer, TrainOutput, TrainerSetup,
};
use crate::layout::{RunLayout, write_json_pretty};
use crate::progress::ProgressEvent;
use crate::tokenizer::{ByteTokenizer, IGNORE_INDEX, Tokenizer};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MODEL_FILE: &str = "retrieval_model.json";
const STATE_FILE: &str = "trainer_state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryEntry {
    input_ids: Vec<u32>,
    labels: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RetrievalModel {
    base_model: String,
    entries: Vec<MemoryEntry>,
    #[serde(skip)]
    shingles: Vec<HashSet<u64>>,
}

impl RetrievalModel {
    fn load(path: &Path) -> PrefgenResult<Self> {
        let bytes = std::fs::read(path)?;
        let mut model: Self = serde_json::from_slice(&bytes)?;
        model.shingles = model.entries.iter().map(|e| shingles(&e.input_ids)).collect();
        Ok(model)
    }

    fn memorise(&mut self, example: &EncodedExample) {
        self.shingles.push(shingles(&example.input_ids));
        self.entries.push(MemoryEntry { input_ids: example.input_ids.clone(), labels: example.labels.clone() });
    }

    /// Labels of the closest memorised input; earliest entry wins ties.
    fn nearest(&self, input_ids: &[u32]) -> Option<&[i64]> {
        let query = shingles(input_ids);
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in self.shingles.iter().enumerate() {
            let score = jaccard(&query, candidate);
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| self.entries[idx].labels.as_slice())
    }

    fn num_parameters(&self) -> usize {
        self.entries.iter().map(|e| e.input_ids.len() + e.labels.len()).sum()
    }
}

fn shingles(ids: &[u32]) -> HashSet<u64> {
    if ids.len() < 2 {
        return ids.iter().map(|&id| u64::from(id)).collect();
    }
    ids.windows(2).map(|w| (u64::from(w[0]) << 32) | u64::from(w[1])).collect()
}

fn jaccard(a: &HashSet<u64>, b: &HashSet<u64>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Fraction of label positions the prediction gets wrong.
fn mismatch_rate(predicted: Option<&[i64]>, labels: &[i64]) -> f64 {
    let labels: Vec<i64> = labels.iter().copied().filter(|&l| l != IGNORE_INDEX).collect();
    let Some(predicted) = predicted else {
        return 1.0;
    };
    let width = labels.len().max(predicted.len());
    if width == 0 {
        return 0.0;
    }
    let hits = labels.iter().zip(predicted).filter(|(a, b)| a == b).count();
    (width - hits) as f64 / width as f64
}

fn resolve_rank(explicit: Option<usize>) -> usize {
    explicit.or_else(|| std::env::var("RANK").ok().and_then(|v| v.parse().ok())).unwrap_or(0)
}

#[derive(Debug, Serialize)]
struct TrainerState<'a> {
    epoch: u32,
    global_step: u64,
    metrics: &'a Metrics,
}

/// Backend producing [`RetrievalTrainer`]s.
#[derive(Debug, Clone, Default)]
pub struct RetrievalBackend;

#[async_trait]
impl Seq2SeqBackend for RetrievalBackend {
    fn id(&self) -> &'static str {
        "retrieval"
    }

    fn load_tokenizer(&self, model: &str) -> PrefgenResult<Arc<dyn Tokenizer>> {
        #[cfg(feature = "hf-tokenizers")]
        {
            let path = Path::new(model).join("tokenizer.json");
            if path.exists() {
                tracing::info!(path = %path.display(), "loading HuggingFace tokenizer");
                return Ok(Arc::new(crate::tokenizer::HfTokenizer::from_file(&path)?));
            }
        }
        tracing::debug!(model, "using byte-level tokenizer");
        Ok(Arc::new(ByteTokenizer))
    }

    async fn build_trainer(&self, setup: TrainerSetup) -> PrefgenResult<Box<dyn Seq2SeqTrainer>> {
        let model_dir = Path::new(&setup.model);
        let model = if model_dir.join(MODEL_FILE).exists() {
            tracing::info!(path = %model_dir.display(), "loading retrieval checkpoint");
            RetrievalModel::load(&model_dir.join(MODEL_FILE))?
        } else if model_dir.is_dir() {
            return Err(PrefgenError::Framework(format!(
                "no {MODEL_FILE} found in checkpoint directory {}",
                model_dir.display()
            )));
        } else {
            RetrievalModel { base_model: setup.model.clone(), ..Default::default() }
        };

        Ok(Box::new(RetrievalTrainer {
            rank: resolve_rank(setup.args.process_rank),
            layout: RunLayout::new(setup.args.output_dir.clone()),
            setup,
            model,
            global_step: 0,
            epoch: 0,
        }))
    }
}

pub struct RetrievalTrainer {
    setup: TrainerSetup,
    model: RetrievalModel,
    layout: RunLayout,
    rank: usize,
    global_step: u64,
    epoch: u32,
}

impl RetrievalTrainer {
    fn run_label(&self) -> String {
        format!("retrieval:{}", self.layout.root().display())
    }

    fn eval_batches<'a>(&self, dataset: &'a EncodedDataset, batch_size: usize) -> Vec<Vec<&'a EncodedExample>> {
        let examples: Vec<&EncodedExample> = dataset.iter().collect();
        examples.chunks(batch_size.max(1)).map(<[_]>::to_vec).collect()
    }

    fn save_checkpoint(&self, metrics: &Metrics) -> PrefgenResult<PathBuf> {
        let dir = self.layout.checkpoint_dir(self.global_step);
        std::fs::create_dir_all(&dir).map_err(|source| PrefgenError::Persistence { path: dir.clone(), source })?;
        write_json_pretty(&dir.join(MODEL_FILE), &self.model)?;
        write_json_pretty(
            &dir.join(STATE_FILE),
            &TrainerState { epoch: self.epoch, global_step: self.global_step, metrics },
        )?;
        Ok(dir)
    }

    /// Keep the newest `save_total_limit` checkpoints, never deleting `keep`.
    fn rotate_checkpoints(&self, keep: Option<&Path>) -> PrefgenResult<()> {
        let mut checkpoints: Vec<(u64, PathBuf)> = std::fs::read_dir(self.layout.root())?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let step = name.strip_prefix("checkpoint-")?.parse::<u64>().ok()?;
                Some((step, entry.path()))
            })
            .collect();
        checkpoints.sort_by_key(|(step, _)| *step);

        let limit = self.setup.args.save_total_limit.max(1);
        let mut excess = checkpoints.len().saturating_sub(limit);
        for (_, path) in checkpoints {
            if excess == 0 {
                break;
            }
            if keep == Some(path.as_path()) {
                continue;
            }
            tracing::debug!(path = %path.display(), "removing old checkpoint");
            std::fs::remove_dir_all(&path)?;
            excess -= 1;
        }
        Ok(())
    }

    fn predict_batch(&self, batch: &CollatedBatch, max_length: usize, vocab: usize, pad: u32) -> BatchOutput {
        let width = batch.labels.first().map_or(0, Vec::len);
        let neighbours: Vec<Option<&[i64]>> = batch
            .input_ids
            .iter()
            .zip(&batch.attention_mask)
            .map(|(ids, mask)| {
                let real: Vec<u32> = ids.iter().zip(mask).filter(|&(_, &m)| m == 1).map(|(&id, _)| id).collect();
                self.model.nearest(&real)
            })
            .collect();

        if self.setup.args.predict_with_generate {
            BatchOutput::Ids(
                neighbours
                    .into_iter()
                    .map(|n| n.map(|labels| labels[..labels.len().min(max_length)].to_vec()).unwrap_or_default())
                    .collect(),
            )
        } else {
            // Teacher-forced shape: one score row per label position.
            let logits = neighbours
                .into_iter()
                .map(|n| {
                    (0..width)
                        .map(|pos| {
                            let token = n
                                .and_then(|labels| labels.get(pos))
                                .and_then(|&l| usize::try_from(l).ok())
                                .filter(|&t| t < vocab)
                                .unwrap_or(pad as usize);
                            let mut row = vec![0.0f32; vocab];
                            row[token] = 1.0;
                            row
                        })
                        .collect()
                })
                .collect();
            BatchOutput::Logits(logits)
        }
    }

    fn run_prediction(&self, dataset: &EncodedDataset, max_length: usize) -> PrefgenResult<(Predictions, Vec<Vec<i64>>, f64)> {
        let tokenizer = &self.setup.tokenizer;
        let (vocab, pad) = (tokenizer.vocab_size(), tokenizer.pad_token_id());

        let mut token_ids: Vec<Vec<i64>> = Vec::with_capacity(dataset.len());
        let mut logits: Vec<Vec<Vec<f32>>> = Vec::new();
        let mut label_ids: Vec<Vec<i64>> = Vec::with_capacity(dataset.len());
        let mut loss_sum = 0.0;

        for batch in self.eval_batches(dataset, self.setup.args.per_device_eval_batch_size) {
            let collated = self.setup.collator.collate(&batch);
            for (ex, labels) in batch.iter().zip(&collated.labels) {
                loss_sum += mismatch_rate(self.model.nearest(&ex.input_ids), labels);
            }
            match self.predict_batch(&collated, max_length, vocab, pad) {
                BatchOutput::Ids(ids) => token_ids.extend(ids),
                BatchOutput::Logits(rows) => logits.extend(rows),
            }
            label_ids.extend(collated.labels);
        }

        // Batches differ in width; pad across them the way a distributed gather does.
        pad_rows(&mut label_ids, IGNORE_INDEX);
        let predictions = if self.setup.args.predict_with_generate {
            pad_rows(&mut token_ids, IGNORE_INDEX);
            Predictions::TokenIds(token_ids)
        } else {
            let width = label_ids.first().map_or(0, Vec::len);
            for seq in &mut logits {
                while seq.len() < width {
                    let mut row = vec![0.0f32; vocab];
                    row[pad as usize] = 1.0;
                    seq.push(row);
                }
            }
            Predictions::Tuple(vec![Predictions::Logits(logits)])
        };

        let loss = if dataset.is_empty() { 0.0 } else { loss_sum / dataset.len() as f64 };
        Ok((predictions, label_ids, loss))
    }

    fn metrics_with_prefix(&self, prefix: &str, predictions: Predictions, label_ids: Vec<Vec<i64>>, loss: f64) -> PrefgenResult<Metrics> {
        let mut metrics = Metrics::new();
        metrics.insert(format!("{prefix}_loss"), loss);
        if let Some(callback) = &self.setup.compute_metrics {
            for (key, value) in callback.compute(EvalPrediction { predictions, label_ids })? {
                metrics.insert(format!("{prefix}_{key}"), value);
            }
        }
        if self.epoch > 0 {
            metrics.insert("epoch".to_string(), f64::from(self.epoch));
        }
        Ok(metrics)
    }
}

enum BatchOutput {
    Ids(Vec<Vec<i64>>),
    Logits(Vec<Vec<Vec<f32>>>),
}

fn pad_rows(rows: &mut [Vec<i64>], value: i64) {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in rows {
        row.resize(width, value);
    }
}

#[async_trait]
impl Seq2SeqTrainer for RetrievalTrainer {
    fn id(&self) -> &'static str {
        "retrieval"
    }

    fn num_parameters(&self) -> usize {
        self.model.num_parameters()
    }

    fn is_world_process_zero(&self) -> bool {
        self.rank == 0
    }

    async fn train(&mut self) -> PrefgenResult<TrainOutput> {
        let args = self.setup.args.clone();
        let train = Arc::clone(&self.setup.train_dataset);
        let eval = Arc::clone(&self.setup.eval_dataset);
        let progress = Arc::clone(&self.setup.progress);
        let run = self.run_label();

        let mut order: Vec<usize> = (0..train.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(args.seed));

        let best_key = args.best_metric_key();
        let mut trackers: Vec<EarlyStoppingTracker> =
            self.setup.callbacks.iter().map(|c| c.tracker(args.greater_is_better)).collect();
        let mut best: Option<(f64, RetrievalModel, Option<PathBuf>)> = None;
        let mut output = TrainOutput::default();
        let mut loss_total = 0.0;
        let mut loss_batches = 0usize;
        let epochs = args.num_train_epochs.max(1) as usize;

        progress.on_event(ProgressEvent::Started { run: run.clone() });

        for epoch in 1..=epochs {
            self.epoch = epoch as u32;
            let seen = self.model.entries.len().min(order.len());
            let target = (epoch * order.len()).div_ceil(epochs).max(seen);

            let mut epoch_loss = 0.0;
            let mut epoch_batches = 0usize;
            for chunk in order[seen.min(target)..target].chunks(args.per_device_train_batch_size.max(1)) {
                let examples: Vec<&EncodedExample> = chunk.iter().filter_map(|&i| train.get(i)).collect();
                let collated = self.setup.collator.collate(&examples);
                // Prequential loss: score the batch before it is memorised.
                let batch_loss = examples
                    .iter()
                    .zip(&collated.labels)
                    .map(|(ex, labels)| mismatch_rate(self.model.nearest(&ex.input_ids), labels))
                    .sum::<f64>()
                    / examples.len().max(1) as f64;
                for ex in &examples {
                    self.model.memorise(ex);
                }
                self.global_step += 1;
                epoch_loss += batch_loss;
                epoch_batches += 1;
            }

            loss_total += epoch_loss;
            loss_batches += epoch_batches;
            let mean_loss = if epoch_batches == 0 { 0.0 } else { epoch_loss / epoch_batches as f64 };
            progress.on_event(ProgressEvent::Epoch { run: run.clone(), epoch: self.epoch, step: self.global_step, loss: mean_loss });

            let mut metrics = Metrics::new();
            if args.evaluation_strategy == IntervalStrategy::Epoch {
                metrics = self.evaluate(&eval, args.generation_max_length).await?;
                progress.on_event(ProgressEvent::Evaluated { run: run.clone(), split: "eval".to_string(), metrics: metrics.clone() });
            }

            let checkpoint = if args.save_strategy == IntervalStrategy::Epoch && self.is_world_process_zero() {
                Some(self.save_checkpoint(&metrics)?)
            } else {
                None
            };

            let mut stop = false;
            if let Some(key) = &best_key {
                if args.evaluation_strategy == IntervalStrategy::Epoch {
                    let value = *metrics.get(key).ok_or_else(|| {
                        PrefgenError::Framework(format!("metric_for_best_model '{key}' not found in evaluation metrics"))
                    })?;
                    let improved = best.as_ref().is_none_or(|(b, _, _)| {
                        if args.greater_is_better { value > *b } else { value < *b }
                    });
                    if improved {
                        best = Some((value, self.model.clone(), checkpoint.clone()));
                    }
                    for tracker in &mut trackers {
                        stop |= tracker.observe(value);
                    }
                }
            }

            if checkpoint.is_some() {
                let keep = best.as_ref().and_then(|(_, _, p)| p.clone());
                self.rotate_checkpoints(keep.as_deref())?;
            }

            if stop {
                tracing::info!(epoch = self.epoch, "early stopping: no improvement for the configured patience");
                output.stopped_early = true;
                break;
            }
        }

        if args.load_best_model_at_end {
            if let Some((value, model, path)) = best {
                tracing::info!(value, checkpoint = ?path, "loading best model");
                self.model = model;
                output.best_checkpoint = path;
            }
        }

        output.global_step = self.global_step;
        output.epochs_completed = self.epoch;
        output.training_loss = if loss_batches == 0 { 0.0 } else { loss_total / loss_batches as f64 };
        progress.on_event(ProgressEvent::Finished { run });
        Ok(output)
    }

    async fn evaluate(&mut self, dataset: &EncodedDataset, max_length: usize) -> PrefgenResult<Metrics> {
        let (predictions, label_ids, loss) = self.run_prediction(dataset, max_length)?;
        self.metrics_with_prefix("eval", predictions, label_ids, loss)
    }

    async fn predict(&mut self, dataset: &EncodedDataset, max_length: usize) -> PrefgenResult<PredictionOutput> {
        let (predictions, label_ids, loss) = self.run_prediction(dataset, max_length)?;
        let metrics = self.metrics_with_prefix("test", predictions.clone(), label_ids.clone(), loss)?;
        Ok(PredictionOutput { predictions, label_ids, metrics })
    }

    async fn save_model(&self, dir: &Path) -> PrefgenResult<()> {
        if !self.is_world_process_zero() {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|source| PrefgenError::Persistence { path: dir.to_path_buf(), source })?;
        write_json_pretty(&dir.join(MODEL_FILE), &self.model)?;
        write_json_pretty(&dir.join("tokenizer_config.json"), &serde_json::json!({ "tokenizer": self.setup.tokenizer.id() }))?;
        Ok(())
    }

    fn save_metrics(&self, split: &str, metrics: &Metrics) -> PrefgenResult<()> {
        if !self.is_world_process_zero() {
            return Ok(());
        }
        write_json_pretty(&self.layout.metrics_path(split), metrics)
    }
}
