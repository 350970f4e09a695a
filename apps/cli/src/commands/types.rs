//! Command type definitions shared between main.rs and tests.

use clap::{Args, Subcommand};
use prefgen_training::{PromptFormat, RunConfigOverlay, TestSplit, TrainSplit, ValSplit};
use std::path::PathBuf;

/// Flags for `prefgen train`. Unset flags fall through to the config file, then defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct TrainArgs {
    /// TOML file with run options (defaults to ./prefgen.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Dataset name; splits are read from <data-dir>/<dataset>/<split>.json
    #[arg(long)]
    pub dataset: Option<String>,

    #[arg(long, alias = "data_dir")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, alias = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// Base model identifier or directory
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub epoch: Option<u32>,

    #[arg(long)]
    pub lr: Option<f64>,

    /// Training batch size
    #[arg(long)]
    pub bs: Option<usize>,

    #[arg(long, alias = "eval_bs")]
    pub eval_bs: Option<usize>,

    /// Evaluation accumulation steps
    #[arg(long, alias = "eval_acc")]
    pub eval_acc: Option<usize>,

    #[arg(long, alias = "input_len")]
    pub input_len: Option<usize>,

    #[arg(long, alias = "output_len")]
    pub output_len: Option<usize>,

    /// train, trainval or minitrain
    #[arg(long, alias = "train_split")]
    pub train_split: Option<TrainSplit>,

    /// test, val or minival
    #[arg(long, alias = "val_split")]
    pub val_split: Option<ValSplit>,

    /// test or minitest
    #[arg(long, alias = "test_split")]
    pub test_split: Option<TestSplit>,

    /// Generate free-running predictions instead of teacher-forced ones
    #[arg(long, alias = "use_generate")]
    pub use_generate: bool,

    /// Skip per-epoch evaluation; only evaluate once at the end
    #[arg(long, alias = "final_eval")]
    pub final_eval: bool,

    /// Earlier-stage val_new.json whose pred_preference is merged into the val split
    #[arg(long, alias = "eval_le")]
    pub eval_le: Option<PathBuf>,

    /// Earlier-stage test_new.json whose pred_preference is merged into the test split
    #[arg(long, alias = "test_le")]
    pub test_le: Option<PathBuf>,

    /// Evaluate an existing checkpoint directory without training
    #[arg(long, alias = "evaluate_dir")]
    pub evaluate_dir: Option<PathBuf>,

    /// REC-P, REC-PA, REC-A or REC-LLM-PA
    #[arg(long, alias = "prompt_format")]
    pub prompt_format: Option<PromptFormat>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Process rank; falls back to the RANK environment variable
    #[arg(long)]
    pub process_rank: Option<usize>,

    /// Output a JSON summary instead of formatted text
    #[arg(long)]
    pub json: bool,
}

impl TrainArgs {
    /// The flags the user actually set.
    pub fn overlay(&self) -> RunConfigOverlay {
        RunConfigOverlay {
            dataset: self.dataset.clone(),
            data_dir: self.data_dir.clone(),
            output_dir: self.output_dir.clone(),
            model: self.model.clone(),
            epoch: self.epoch,
            lr: self.lr,
            bs: self.bs,
            eval_bs: self.eval_bs,
            eval_acc: self.eval_acc,
            input_len: self.input_len,
            output_len: self.output_len,
            train_split: self.train_split,
            val_split: self.val_split,
            test_split: self.test_split,
            use_generate: self.use_generate.then_some(true),
            final_eval: self.final_eval.then_some(true),
            eval_le: self.eval_le.clone(),
            test_le: self.test_le.clone(),
            evaluate_dir: self.evaluate_dir.clone(),
            prompt_format: self.prompt_format,
            seed: self.seed,
            process_rank: self.process_rank,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum RunsCommand {
    /// List runs with a run_manifest.json under the output directory
    List {
        /// Output directory to scan (defaults to the configured output_dir)
        #[arg(long, alias = "output_dir")]
        output_dir: Option<PathBuf>,

        /// TOML file with run options
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
