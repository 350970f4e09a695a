//! End-to-end fine-tuning run: load, encode, train, evaluate, augment.

use crate::artifacts::{ArtifactKind, RunArtifact, RunId, RunManifest, make_artifact};
use crate::augment::{AugmentOutcome, OverlapScorer, PredictionAugmenter, RecordScorer};
use crate::collator::Seq2SeqCollator;
use crate::config::{RunConfig, RunPlan, TaskKind, TrainingMode};
use crate::encoding::EncodedDataset;
use crate::error::PrefgenResult;
use crate::framework::{
    EarlyStoppingCallback, IntervalStrategy, MetricCallback, Metrics, Seq2SeqBackend, TrainOutput, TrainerSetup,
    TrainingArguments,
};
use crate::layout::{AugmentSplit, RunLayout, write_json_pretty};
use crate::metrics::MetricEvaluator;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::record::Record;
use crate::store::ExampleStore;
use std::path::PathBuf;
use std::sync::Arc;

pub const EARLY_STOPPING_PATIENCE: usize = 10;
pub const SAVE_TOTAL_LIMIT: usize = 3;
pub const WEIGHT_DECAY: f64 = 0.01;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub plan: RunPlan,
    pub primary: bool,
    pub train: Option<TrainOutput>,
    pub test_metrics: Metrics,
    pub augmented: Vec<AugmentOutcome>,
    /// Empty on non-primary processes.
    pub artifacts: Vec<RunArtifact>,
    pub manifest_path: Option<PathBuf>,
}

/// Framework arguments for `plan`. Mode-dependent settings are decided here only.
#[must_use]
pub fn training_arguments(config: &RunConfig, plan: &RunPlan) -> TrainingArguments {
    let (metric, greater_is_better) = plan.task.selection_metric();
    let per_epoch = plan.mode == TrainingMode::PerEpoch;

    TrainingArguments {
        output_dir: plan.save_dir.clone(),
        overwrite_output_dir: true,
        do_train: !plan.skip_training,
        do_eval: per_epoch,
        evaluation_strategy: if per_epoch { IntervalStrategy::Epoch } else { IntervalStrategy::No },
        save_strategy: IntervalStrategy::Epoch,
        save_total_limit: SAVE_TOTAL_LIMIT,
        learning_rate: config.lr,
        eval_accumulation_steps: config.eval_acc,
        per_device_train_batch_size: config.bs,
        per_device_eval_batch_size: config.eval_bs,
        weight_decay: WEIGHT_DECAY,
        num_train_epochs: config.epoch,
        metric_for_best_model: per_epoch.then(|| metric.to_string()),
        greater_is_better: per_epoch && greater_is_better,
        load_best_model_at_end: per_epoch,
        predict_with_generate: config.use_generate,
        generation_max_length: config.output_len,
        seed: config.seed,
        process_rank: config.process_rank,
    }
}

pub struct TrainingOrchestrator {
    backend: Arc<dyn Seq2SeqBackend>,
    progress: Arc<dyn ProgressSink>,
    scorer: Arc<dyn RecordScorer>,
}

impl TrainingOrchestrator {
    #[must_use]
    pub fn new(backend: Arc<dyn Seq2SeqBackend>, progress: Arc<dyn ProgressSink>) -> Self {
        Self { backend, progress, scorer: Arc::new(OverlapScorer::default()) }
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn RecordScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub async fn run(&self, config: &RunConfig) -> PrefgenResult<RunReport> {
        let plan = config.plan()?;
        let run_id = RunId::new();
        let label = format!("{}-{}", config.dataset, config.prompt_format);

        match serde_json::to_string(config) {
            Ok(json) => tracing::info!(run_id = %run_id, config = %json, "resolved run configuration"),
            Err(e) => tracing::warn!(error = %e, "could not render run configuration"),
        }
        tracing::info!(mode = ?plan.mode, task = ?plan.task, save_dir = %plan.save_dir.display(), "run plan");

        tracing::info!(model = %plan.model, backend = self.backend.id(), "loading tokenizer");
        let tokenizer = self.backend.load_tokenizer(&plan.model)?;

        let splits = ExampleStore::load(config)?;
        let encode = |records: &[Record]| {
            EncodedDataset::new(records, tokenizer.as_ref(), config.input_len, config.output_len, config.prompt_format)
                .map(Arc::new)
        };
        let train_set = encode(&splits.train)?;
        let val_set = encode(&splits.val)?;
        let test_set = encode(&splits.test)?;

        let compute_metrics: Option<Arc<dyn MetricCallback>> = match plan.task {
            TaskKind::RationaleGeneration => Some(Arc::new(MetricEvaluator::new(Arc::clone(&tokenizer)))),
            TaskKind::LabelOnly => None,
        };

        let args = training_arguments(config, &plan);
        let setup = TrainerSetup {
            model: plan.model.clone(),
            args,
            tokenizer: Arc::clone(&tokenizer),
            train_dataset: train_set,
            eval_dataset: Arc::clone(&val_set),
            collator: Seq2SeqCollator::new(tokenizer.pad_token_id()),
            compute_metrics,
            callbacks: vec![EarlyStoppingCallback::new(EARLY_STOPPING_PATIENCE)],
            progress: Arc::clone(&self.progress),
        };

        tracing::info!(model = %plan.model, "building trainer");
        let mut trainer = self.backend.build_trainer(setup).await?;
        let primary = trainer.is_world_process_zero();
        tracing::info!(parameters = trainer.num_parameters(), primary, "model ready");

        let layout = RunLayout::new(plan.save_dir.clone());
        if primary {
            layout.ensure_root()?;
        }

        self.progress.on_event(ProgressEvent::Message { run: label.clone(), message: format!("save dir {}", plan.save_dir.display()) });

        let train = if plan.skip_training {
            tracing::info!(dir = %plan.save_dir.display(), "evaluating existing checkpoint, training skipped");
            None
        } else {
            let output = trainer.train().await?;
            tracing::info!(
                steps = output.global_step,
                epochs = output.epochs_completed,
                loss = output.training_loss,
                stopped_early = output.stopped_early,
                "training finished"
            );
            if primary {
                trainer.save_model(&plan.save_dir).await?;
            }
            Some(output)
        };

        let test_metrics = trainer.evaluate(&test_set, config.output_len).await?;
        trainer.log_metrics("test", &test_metrics);
        if primary {
            trainer.save_metrics("test", &test_metrics)?;
        }
        self.progress.on_event(ProgressEvent::Evaluated {
            run: label.clone(),
            split: "test".to_string(),
            metrics: test_metrics.clone(),
        });

        let mut augmented = Vec::new();
        if plan.task == TaskKind::RationaleGeneration {
            let augmenter =
                PredictionAugmenter::new(Arc::clone(&tokenizer), Arc::clone(&self.scorer), layout.clone(), config.output_len);
            let passes = [(AugmentSplit::Test, &test_set, &splits.test), (AugmentSplit::Val, &val_set, &splits.val)];
            for (split, dataset, records) in passes {
                if let Some(outcome) = augmenter.augment_split(trainer.as_mut(), dataset, records, split).await? {
                    if let Some(scores) = &outcome.scores {
                        trainer.log_metrics(split.as_str(), scores);
                    }
                    augmented.push(outcome);
                }
            }
        }

        let mut artifacts = Vec::new();
        let mut manifest_path = None;
        if primary {
            artifacts.push(make_artifact(ArtifactKind::Metrics, layout.metrics_path("test"))?);
            artifacts.extend(augmented.iter().flat_map(|o| o.artifacts.iter().cloned()));
            if let Some(best) = train.as_ref().and_then(|t| t.best_checkpoint.clone()) {
                let state = best.join("trainer_state.json");
                if state.exists() {
                    artifacts.push(make_artifact(ArtifactKind::Checkpoint, state)?);
                }
            }

            let manifest = RunManifest {
                run_id: run_id.clone(),
                created_at: chrono::Utc::now(),
                dataset: config.dataset.clone(),
                prompt_format: config.prompt_format,
                mode: plan.mode,
                model: plan.model.clone(),
                trained: train.is_some(),
                test_metrics: test_metrics.clone(),
                artifacts: artifacts.clone(),
            };
            let path = layout.run_manifest_path();
            write_json_pretty(&path, &manifest)?;
            manifest_path = Some(path);
        }

        self.progress.on_event(ProgressEvent::Finished { run: label });
        Ok(RunReport { run_id, plan, primary, train, test_metrics, augmented, artifacts, manifest_path })
    }
}

/// Run one pipeline with the default record scorer.
pub async fn run(
    config: &RunConfig,
    backend: Arc<dyn Seq2SeqBackend>,
    progress: Arc<dyn ProgressSink>,
) -> PrefgenResult<RunReport> {
    TrainingOrchestrator::new(backend, progress).run(config).await
}
