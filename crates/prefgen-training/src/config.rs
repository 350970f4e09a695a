//! Run configuration.
//!
//! Configuration precedence:
//! 1. Command-line flags (an overlay built by the CLI)
//! 2. TOML config file (`--config <path>`)
//! 3. Defaults
//!
//! String-valued choices are parsed into enums here, once. Everything that
//! depends on the prompt format or `final_eval` reads the resulting
//! [`TaskKind`] / [`TrainingMode`] from a [`RunPlan`].

use crate::error::{PrefgenError, PrefgenResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prompt template controlling which record fields become input vs. target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptFormat {
    /// Generate the user's preference rationale.
    #[serde(rename = "REC-P")]
    RecP,
    /// Predict the label from history, candidate and the gold preference.
    #[serde(rename = "REC-PA")]
    RecPa,
    /// Predict the label from history and candidate only.
    #[serde(rename = "REC-A")]
    RecA,
    /// Predict the label using a preference generated by an earlier stage.
    #[serde(rename = "REC-LLM-PA")]
    RecLlmPa,
}

impl PromptFormat {
    pub const ALL: [Self; 4] = [Self::RecP, Self::RecPa, Self::RecA, Self::RecLlmPa];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecP => "REC-P",
            Self::RecPa => "REC-PA",
            Self::RecA => "REC-A",
            Self::RecLlmPa => "REC-LLM-PA",
        }
    }

    /// Formats whose name ends in `A` predict a label; the rest generate text.
    #[must_use]
    pub fn task_kind(self) -> TaskKind {
        match self {
            Self::RecP => TaskKind::RationaleGeneration,
            Self::RecPa | Self::RecA | Self::RecLlmPa => TaskKind::LabelOnly,
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptFormat {
    type Err = PrefgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|f| f.as_str() == s).ok_or_else(|| {
            PrefgenError::config(format!(
                "unsupported prompt format '{s}' (expected one of REC-P, REC-PA, REC-A, REC-LLM-PA)"
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Target is a short label; selection uses `eval_loss`, nothing is scored as text.
    LabelOnly,
    /// Target is free text scored against the reference with ROUGE.
    RationaleGeneration,
}

impl TaskKind {
    /// Metric used to pick the best checkpoint, and whether larger is better.
    #[must_use]
    pub fn selection_metric(self) -> (&'static str, bool) {
        match self {
            Self::LabelOnly => ("eval_loss", false),
            Self::RationaleGeneration => ("rougeL", true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    /// Train every epoch, evaluate once on the test split at the end.
    FinalOnly,
    /// Evaluate on the validation split after every epoch with early stopping.
    PerEpoch,
}

impl TrainingMode {
    #[must_use]
    pub fn from_final_eval(final_eval: bool) -> Self {
        if final_eval { Self::FinalOnly } else { Self::PerEpoch }
    }
}

macro_rules! split_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// File stem of the split under `<data_dir>/<dataset>/`.
            #[must_use]
            pub fn file_stem(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.file_stem())
            }
        }

        impl FromStr for $name {
            type Err = PrefgenError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(PrefgenError::config(format!(
                        concat!("invalid ", stringify!($name), " '{}' (expected one of: {})"),
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

split_enum!(
    /// Records used for training.
    TrainSplit { Train => "train", Trainval => "trainval", Minitrain => "minitrain" }
);
split_enum!(
    /// Records used for per-epoch evaluation and validation augmentation.
    ValSplit { Test => "test", Val => "val", Minival => "minival" }
);
split_enum!(
    /// Records used for the final evaluation and test augmentation.
    TestSplit { Test => "test", Minitest => "minitest" }
);

/// Fully resolved run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub dataset: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model: String,
    pub epoch: u32,
    pub lr: f64,
    pub bs: usize,
    pub eval_bs: usize,
    /// Evaluation accumulation steps handed to the framework.
    pub eval_acc: Option<usize>,
    pub input_len: usize,
    pub output_len: usize,
    pub train_split: TrainSplit,
    pub val_split: ValSplit,
    pub test_split: TestSplit,
    pub use_generate: bool,
    pub final_eval: bool,
    /// Earlier-stage record collection carrying `pred_preference` for the val split.
    pub eval_le: Option<PathBuf>,
    /// Earlier-stage record collection carrying `pred_preference` for the test split.
    pub test_le: Option<PathBuf>,
    pub evaluate_dir: Option<PathBuf>,
    pub prompt_format: PromptFormat,
    pub seed: u64,
    /// Rank of this process in a multi-process run. `None` defers to the backend.
    pub process_rank: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset: "ml-100k".to_string(),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("experiments"),
            model: "flan-alpaca-base".to_string(),
            epoch: 20,
            lr: 5e-5,
            bs: 16,
            eval_bs: 16,
            eval_acc: None,
            input_len: 1024,
            output_len: 128,
            train_split: TrainSplit::Train,
            val_split: ValSplit::Val,
            test_split: TestSplit::Test,
            use_generate: false,
            final_eval: false,
            eval_le: None,
            test_le: None,
            evaluate_dir: None,
            prompt_format: PromptFormat::RecPa,
            seed: 42,
            process_rank: None,
        }
    }
}

/// Partial configuration: every field optional, merged over a [`RunConfig`].
///
/// Used both for TOML files and for the CLI's explicit flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfigOverlay {
    pub dataset: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub epoch: Option<u32>,
    pub lr: Option<f64>,
    pub bs: Option<usize>,
    pub eval_bs: Option<usize>,
    pub eval_acc: Option<usize>,
    pub input_len: Option<usize>,
    pub output_len: Option<usize>,
    pub train_split: Option<TrainSplit>,
    pub val_split: Option<ValSplit>,
    pub test_split: Option<TestSplit>,
    pub use_generate: Option<bool>,
    pub final_eval: Option<bool>,
    pub eval_le: Option<PathBuf>,
    pub test_le: Option<PathBuf>,
    pub evaluate_dir: Option<PathBuf>,
    pub prompt_format: Option<PromptFormat>,
    pub seed: Option<u64>,
    pub process_rank: Option<usize>,
}

impl RunConfigOverlay {
    /// Load an overlay from a TOML file.
    pub fn load_from_file(path: &Path) -> PrefgenResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PrefgenError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            PrefgenError::config(format!("failed to parse config file {}: {e}", path.display()))
        })
    }
}

impl RunConfig {
    /// Merge an overlay into this configuration. `Some` values win.
    pub fn merge(&mut self, other: &RunConfigOverlay) {
        if let Some(ref dataset) = other.dataset {
            self.dataset = dataset.clone();
        }
        if let Some(ref data_dir) = other.data_dir {
            self.data_dir = data_dir.clone();
        }
        if let Some(ref output_dir) = other.output_dir {
            self.output_dir = output_dir.clone();
        }
        if let Some(ref model) = other.model {
            self.model = model.clone();
        }
        self.epoch = other.epoch.unwrap_or(self.epoch);
        self.lr = other.lr.unwrap_or(self.lr);
        self.bs = other.bs.unwrap_or(self.bs);
        self.eval_bs = other.eval_bs.unwrap_or(self.eval_bs);
        self.input_len = other.input_len.unwrap_or(self.input_len);
        self.output_len = other.output_len.unwrap_or(self.output_len);
        self.train_split = other.train_split.unwrap_or(self.train_split);
        self.val_split = other.val_split.unwrap_or(self.val_split);
        self.test_split = other.test_split.unwrap_or(self.test_split);
        self.use_generate = other.use_generate.unwrap_or(self.use_generate);
        self.final_eval = other.final_eval.unwrap_or(self.final_eval);
        self.prompt_format = other.prompt_format.unwrap_or(self.prompt_format);
        self.seed = other.seed.unwrap_or(self.seed);

        if other.eval_acc.is_some() {
            self.eval_acc = other.eval_acc;
        }
        if other.eval_le.is_some() {
            self.eval_le.clone_from(&other.eval_le);
        }
        if other.test_le.is_some() {
            self.test_le.clone_from(&other.test_le);
        }
        if other.evaluate_dir.is_some() {
            self.evaluate_dir.clone_from(&other.evaluate_dir);
        }
        if other.process_rank.is_some() {
            self.process_rank = other.process_rank;
        }
    }

    /// Defaults, then the optional config file, then the CLI overlay.
    pub fn layered(file: Option<&Path>, cli: &RunConfigOverlay) -> PrefgenResult<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            config.merge(&RunConfigOverlay::load_from_file(path)?);
        }
        config.merge(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PrefgenResult<()> {
        if self.dataset.trim().is_empty() {
            return Err(PrefgenError::config("dataset is required"));
        }
        if self.model.trim().is_empty() && self.evaluate_dir.is_none() {
            return Err(PrefgenError::config("model is required"));
        }
        if self.epoch == 0 {
            return Err(PrefgenError::config("epoch must be >= 1"));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(PrefgenError::config("lr must be > 0"));
        }
        if self.bs == 0 || self.eval_bs == 0 {
            return Err(PrefgenError::config("batch sizes must be >= 1"));
        }
        if self.input_len == 0 || self.output_len == 0 {
            return Err(PrefgenError::config("input_len and output_len must be >= 1"));
        }
        if self.eval_acc == Some(0) {
            return Err(PrefgenError::config("eval_acc must be >= 1 when set"));
        }
        Ok(())
    }

    /// Derive the run plan. All mode decisions are taken here.
    pub fn plan(&self) -> PrefgenResult<RunPlan> {
        self.validate()?;
        let (model, save_dir, skip_training) = match &self.evaluate_dir {
            Some(dir) => (dir.display().to_string(), dir.clone(), true),
            None => (
                self.model.clone(),
                self.output_dir.join(format!("{}-{}", self.dataset, self.prompt_format)),
                false,
            ),
        };
        Ok(RunPlan {
            mode: TrainingMode::from_final_eval(self.final_eval),
            task: self.prompt_format.task_kind(),
            model,
            save_dir,
            skip_training,
        })
    }
}

/// Decisions derived once from a [`RunConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub mode: TrainingMode,
    pub task: TaskKind,
    /// Model identifier or checkpoint path to load.
    pub model: String,
    pub save_dir: PathBuf,
    /// True when `evaluate_dir` is set: evaluate/predict only.
    pub skip_training: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prompt_format_parse_and_task_kind() {
        assert_eq!("REC-P".parse::<PromptFormat>().unwrap(), PromptFormat::RecP);
        assert_eq!("REC-LLM-PA".parse::<PromptFormat>().unwrap().task_kind(), TaskKind::LabelOnly);
        assert_eq!(PromptFormat::RecP.task_kind(), TaskKind::RationaleGeneration);
        for f in PromptFormat::ALL {
            assert_eq!(f.as_str().ends_with('A'), f.task_kind() == TaskKind::LabelOnly);
        }
    }

    #[test]
    fn test_unsupported_prompt_format_is_configuration_error() {
        let err = "REC-X".parse::<PromptFormat>().unwrap_err();
        assert!(matches!(err, PrefgenError::Configuration(_)));
    }

    #[test]
    fn test_split_parse() {
        assert_eq!("minitrain".parse::<TrainSplit>().unwrap(), TrainSplit::Minitrain);
        assert_eq!("minival".parse::<ValSplit>().unwrap().file_stem(), "minival");
        assert!("val".parse::<TestSplit>().is_err());
    }

    #[test]
    fn test_selection_metric() {
        assert_eq!(PromptFormat::RecA.task_kind().selection_metric(), ("eval_loss", false));
        assert_eq!(PromptFormat::RecP.task_kind().selection_metric(), ("rougeL", true));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RunConfig { epoch: 0, ..Default::default() };
        assert!(config.validate().is_err());
        let config = RunConfig { lr: f64::NAN, ..Default::default() };
        assert!(config.validate().is_err());
        let config = RunConfig { output_len: 0, ..Default::default() };
        assert!(config.validate().is_err());
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_layered_precedence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.toml");
        std::fs::write(&path, "dataset = \"beauty\"\nepoch = 3\nprompt_format = \"REC-P\"\n").unwrap();

        let cli = RunConfigOverlay { epoch: Some(5), ..Default::default() };
        let config = RunConfig::layered(Some(&path), &cli).unwrap();
        assert_eq!(config.dataset, "beauty");
        assert_eq!(config.epoch, 5);
        assert_eq!(config.prompt_format, PromptFormat::RecP);
        assert_eq!(config.bs, 16);
    }

    #[test]
    fn test_layered_rejects_unknown_prompt_format_in_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.toml");
        std::fs::write(&path, "prompt_format = \"REC-Q\"\n").unwrap();
        let err = RunConfig::layered(Some(&path), &RunConfigOverlay::default()).unwrap_err();
        assert!(matches!(err, PrefgenError::Configuration(_)));
    }

    #[test]
    fn test_plan_save_dir_and_evaluate_dir() {
        let config = RunConfig { final_eval: true, ..Default::default() };
        let plan = config.plan().unwrap();
        assert_eq!(plan.mode, TrainingMode::FinalOnly);
        assert_eq!(plan.save_dir, PathBuf::from("experiments/ml-100k-REC-PA"));
        assert!(!plan.skip_training);

        let config = RunConfig { evaluate_dir: Some(PathBuf::from("ckpt/best")), ..Default::default() };
        let plan = config.plan().unwrap();
        assert_eq!(plan.mode, TrainingMode::PerEpoch);
        assert_eq!(plan.save_dir, PathBuf::from("ckpt/best"));
        assert_eq!(plan.model, "ckpt/best");
        assert!(plan.skip_training);
    }
}
