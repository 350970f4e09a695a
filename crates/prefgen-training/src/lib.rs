//! Prefgen Training
//!
//! Fine-tuning orchestration for seq2seq recommendation-preference models:
//! - Loading record collections and rendering them as prompts (`ExampleStore`, `prompt`)
//! - Encoding and batching for a seq2seq framework (`EncodedDataset`, `Seq2SeqCollator`)
//! - Driving train / evaluate / predict through backend traits (`TrainingOrchestrator`)
//! - Scoring generated rationales and writing augmented records for the next stage

pub mod artifacts;
pub mod augment;
pub mod backend;
pub mod collator;
pub mod config;
pub mod encoding;
pub mod error;
pub mod framework;
pub mod layout;
pub mod metrics;
pub mod orchestrator;
pub mod overlap;
pub mod progress;
pub mod prompt;
pub mod record;
pub mod registry;
pub mod store;
pub mod tokenizer;

pub use artifacts::{ArtifactKind, RunArtifact, RunId, RunManifest};
pub use augment::{AugmentOutcome, OverlapScorer, PredictionAugmenter, RecordScorer, augment, keyed_texts};
pub use backend::RetrievalBackend;
pub use collator::{CollatedBatch, Seq2SeqCollator};
pub use config::{PromptFormat, RunConfig, RunConfigOverlay, RunPlan, TaskKind, TestSplit, TrainSplit, TrainingMode, ValSplit};
pub use encoding::{EncodedDataset, EncodedExample};
pub use error::{PrefgenError, PrefgenResult};
pub use framework::{
    EarlyStoppingCallback, EvalPrediction, MetricCallback, Metrics, PredictionOutput, Predictions, Seq2SeqBackend,
    Seq2SeqTrainer, TrainOutput, TrainerSetup, TrainingArguments,
};
pub use layout::{AugmentSplit, RunLayout};
pub use metrics::MetricEvaluator;
pub use orchestrator::{RunReport, TrainingOrchestrator};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, StdoutProgressSink, TracingProgressSink};
pub use record::{PreferenceLabel, Record, RecordId, StoredLabel};
pub use registry::{RunEntry, discover_runs};
pub use store::{DatasetSplits, ExampleStore};
pub use tokenizer::{ByteTokenizer, IGNORE_INDEX, Tokenizer};
