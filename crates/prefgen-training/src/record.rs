use crate::error::PrefgenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a record. Source files use either strings or numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl RecordId {
    /// Key used in prediction/reference mappings.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::Text(s) => s.fmt(f),
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Whether the user prefers the candidate item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceLabel {
    #[serde(alias = "Yes", alias = "YES")]
    Yes,
    #[serde(alias = "No", alias = "NO")]
    No,
}

impl PreferenceLabel {
    /// Every target text a label-only prompt format can produce.
    pub const TOKENS: [&'static str; 2] = ["yes", "no"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

impl FromStr for PreferenceLabel {
    type Err = PrefgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("yes") {
            Ok(Self::Yes)
        } else if s.eq_ignore_ascii_case("no") {
            Ok(Self::No)
        } else {
            Err(PrefgenError::Configuration(format!("label must be yes or no, got {s:?}")))
        }
    }
}

/// A label as written in the source file.
///
/// Parsing accepts any casing of yes/no; serialization writes the original text back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoredLabel {
    kind: PreferenceLabel,
    raw: String,
}

impl StoredLabel {
    #[must_use]
    pub fn kind(&self) -> PreferenceLabel {
        self.kind
    }

    /// The source spelling.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl TryFrom<String> for StoredLabel {
    type Error = PrefgenError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Ok(Self { kind: raw.parse()?, raw })
    }
}

impl From<StoredLabel> for String {
    fn from(label: StoredLabel) -> Self {
        label.raw
    }
}

impl From<PreferenceLabel> for StoredLabel {
    fn from(kind: PreferenceLabel) -> Self {
        Self { kind, raw: kind.as_str().to_string() }
    }
}

impl PartialEq<PreferenceLabel> for StoredLabel {
    fn eq(&self, other: &PreferenceLabel) -> bool {
        self.kind == *other
    }
}

/// One recommendation instance.
///
/// Fields the pipeline does not interpret are kept in `extra` so that a
/// persisted collection carries everything the source file had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub qid: RecordId,
    /// Items the user interacted with, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
    pub candidate: String,
    /// Gold preference rationale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference: Option<String>,
    pub label: StoredLabel,
    /// Preference generated by a trained model; filled by augmentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pred_preference: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    #[must_use]
    pub fn new(qid: impl Into<RecordId>, history: Vec<String>, candidate: &str, label: PreferenceLabel) -> Self {
        Self {
            qid: qid.into(),
            history,
            candidate: candidate.to_string(),
            preference: None,
            label: label.into(),
            pred_preference: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_preference(mut self, preference: &str) -> Self {
        self.preference = Some(preference.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "qid": 7,
            "history": ["Heat (1995)", "Fargo (1996)"],
            "candidate": "Casino (1995)",
            "label": "Yes",
            "rating": 4
        });
        let record: Record = serde_json::from_value(raw).unwrap();
        assert_eq!(record.qid, RecordId::Number(7));
        assert_eq!(record.qid.key(), "7");
        assert_eq!(record.label, PreferenceLabel::Yes);
        assert_eq!(record.extra.get("rating"), Some(&serde_json::json!(4)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["rating"], 4);
        assert_eq!(back["label"], "Yes");
        assert!(back.get("pred_preference").is_none());
    }

    #[test]
    fn test_label_parsing_ignores_case() {
        let label: StoredLabel = serde_json::from_value(serde_json::json!("NO")).unwrap();
        assert_eq!(label.kind(), PreferenceLabel::No);
        assert_eq!(label.raw(), "NO");

        let rejected: Result<StoredLabel, _> = serde_json::from_value(serde_json::json!("maybe"));
        assert!(rejected.is_err());
    }
}
