//! Record → (input text, target text) for each [`PromptFormat`].

use crate::config::PromptFormat;
use crate::error::{PrefgenError, PrefgenResult};
use crate::record::Record;

const LABEL_QUESTION: &str = "Will the user enjoy the candidate item? Answer yes or no.";
const PREFERENCE_QUESTION: &str = "Describe the user's preference regarding the candidate item.";

/// A formatted training pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub input: String,
    pub target: String,
}

/// Build the model input and target for `record` under `format`.
///
/// Pure. Never returns an empty input.
pub fn format(record: &Record, format: PromptFormat) -> PrefgenResult<PromptPair> {
    let context = context_block(record);

    let (input, target) = match format {
        PromptFormat::RecP => {
            let preference = non_empty(record.preference.as_deref())
                .ok_or_else(|| missing(record, format, "preference"))?;
            (format!("{context}\n{PREFERENCE_QUESTION}"), preference.to_string())
        }
        PromptFormat::RecPa => {
            let preference = non_empty(record.preference.as_deref())
                .ok_or_else(|| missing(record, format, "preference"))?;
            (
                format!("{context}\nUser preference: {preference}\n{LABEL_QUESTION}"),
                record.label.kind().as_str().to_string(),
            )
        }
        PromptFormat::RecA => (format!("{context}\n{LABEL_QUESTION}"), record.label.kind().as_str().to_string()),
        PromptFormat::RecLlmPa => {
            // Earlier-stage splits carry `pred_preference`; train falls back to gold.
            let preference = non_empty(record.pred_preference.as_deref())
                .or_else(|| non_empty(record.preference.as_deref()))
                .ok_or_else(|| missing(record, format, "pred_preference or preference"))?;
            (
                format!("{context}\nUser preference: {preference}\n{LABEL_QUESTION}"),
                record.label.kind().as_str().to_string(),
            )
        }
    };

    Ok(PromptPair { input, target })
}

fn context_block(record: &Record) -> String {
    let history = if record.history.is_empty() {
        "(none)".to_string()
    } else {
        record.history.join(", ")
    };
    format!("User history: {history}\nCandidate item: {}", record.candidate.trim())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn missing(record: &Record, format: PromptFormat, field: &str) -> PrefgenError {
    PrefgenError::config(format!("record '{}' has no {field}, required by {format}", record.qid))
}
