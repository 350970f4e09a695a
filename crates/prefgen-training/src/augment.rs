//! Post-training inference that enriches record collections with the model's
//! own predictions for the next training stage.

use crate::artifacts::{ArtifactKind, RunArtifact, make_artifact};
use crate::encoding::EncodedDataset;
use crate::error::{PrefgenError, PrefgenResult};
use crate::framework::{Metrics, Seq2SeqTrainer};
use crate::layout::{AugmentSplit, RunLayout, write_json_pretty};
use crate::metrics::decode_predictions;
use crate::overlap::{RougeScorer, bleu, percent4};
use crate::record::Record;
use crate::tokenizer::Tokenizer;
use serde::Serialize;
use std::sync::Arc;

/// `qid → text`, in record order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyedTexts(Vec<(String, String)>);

impl KeyedTexts {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Build the prediction and reference mappings in one pass over `records`.
pub fn keyed_texts(
    records: &[Record],
    predictions: &[String],
    references: &[String],
) -> PrefgenResult<(KeyedTexts, KeyedTexts)> {
    if records.len() != predictions.len() || records.len() != references.len() {
        return Err(PrefgenError::decode(format!(
            "{} records, {} predictions, {} references",
            records.len(),
            predictions.len(),
            references.len()
        )));
    }

    let mut preds = Vec::with_capacity(records.len());
    let mut refs = Vec::with_capacity(records.len());
    for ((record, pred), reference) in records.iter().zip(predictions).zip(references) {
        let key = record.qid.key();
        preds.push((key.clone(), pred.clone()));
        refs.push((key, reference.clone()));
    }
    Ok((KeyedTexts(preds), KeyedTexts(refs)))
}

/// New collection with `pred_preference` set from `predictions[idx]`.
/// `records` is left untouched.
pub fn augment(records: &[Record], predictions: &[String]) -> PrefgenResult<Vec<Record>> {
    if records.len() != predictions.len() {
        return Err(PrefgenError::decode(format!(
            "{} predictions for {} records",
            predictions.len(),
            records.len()
        )));
    }
    Ok(records
        .iter()
        .zip(predictions)
        .map(|(record, pred)| Record { pred_preference: Some(pred.clone()), ..record.clone() })
        .collect())
}

/// Record-level scoring of generated rationales.
pub trait RecordScorer: Send + Sync {
    fn get_scores(&self, predictions: &KeyedTexts, references: &KeyedTexts) -> PrefgenResult<Metrics>;
}

/// ROUGE-1/2/L and BLEU-1..4, averaged over records, scaled to 0–100.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapScorer {
    rouge: RougeScorer,
}

impl RecordScorer for OverlapScorer {
    fn get_scores(&self, predictions: &KeyedTexts, references: &KeyedTexts) -> PrefgenResult<Metrics> {
        if !predictions.keys().eq(references.keys()) {
            return Err(PrefgenError::decode("prediction and reference keys differ"));
        }

        let mut sums = [0.0f64; 7];
        for ((_, pred), (_, reference)) in predictions.iter().zip(references.iter()) {
            let rouge = self.rouge.score(reference, pred);
            sums[0] += rouge.rouge1.fmeasure;
            sums[1] += rouge.rouge2.fmeasure;
            sums[2] += rouge.rouge_l.fmeasure;

            let ref_tokens = self.rouge.tokenize(reference);
            let hyp_tokens = self.rouge.tokenize(pred);
            for n in 1..=4 {
                sums[2 + n] += bleu(&ref_tokens, &hyp_tokens, n);
            }
        }

        let count = predictions.len().max(1) as f64;
        Ok(["rouge_1", "rouge_2", "rouge_l", "bleu_1", "bleu_2", "bleu_3", "bleu_4"]
            .into_iter()
            .zip(sums)
            .map(|(k, v)| (k.to_string(), percent4(v / count)))
            .collect())
    }
}

#[derive(Serialize)]
struct TestPredictions<'a> {
    scores: &'a Metrics,
    preds: &'a [String],
    labels: &'a [String],
}

#[derive(Serialize)]
struct ValPredictions<'a> {
    preds: &'a [String],
    labels: &'a [String],
}

/// Result of one augmentation pass on the primary process.
#[derive(Debug, Clone)]
pub struct AugmentOutcome {
    pub split: AugmentSplit,
    pub predictions: Vec<String>,
    pub labels: Vec<String>,
    pub records: Vec<Record>,
    /// Test split only.
    pub scores: Option<Metrics>,
    pub artifacts: Vec<RunArtifact>,
}

pub struct PredictionAugmenter {
    tokenizer: Arc<dyn Tokenizer>,
    scorer: Arc<dyn RecordScorer>,
    layout: RunLayout,
    max_length: usize,
}

impl PredictionAugmenter {
    #[must_use]
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        scorer: Arc<dyn RecordScorer>,
        layout: RunLayout,
        max_length: usize,
    ) -> Self {
        Self { tokenizer, scorer, layout, max_length }
    }

    /// Predict over `dataset`, attach the predictions to `records` and persist
    /// the split's two artifacts. Returns `None` on non-primary processes,
    /// which write nothing.
    pub async fn augment_split(
        &self,
        trainer: &mut dyn Seq2SeqTrainer,
        dataset: &EncodedDataset,
        records: &[Record],
        split: AugmentSplit,
    ) -> PrefgenResult<Option<AugmentOutcome>> {
        let output = trainer.predict(dataset, self.max_length).await?;
        if !trainer.is_world_process_zero() {
            tracing::debug!(split = split.as_str(), "not the primary process, skipping persistence");
            return Ok(None);
        }

        let decoded = decode_predictions(self.tokenizer.as_ref(), output.predictions, &output.label_ids)?;
        let predictions: Vec<String> = decoded.predictions.iter().map(|p| p.trim().to_string()).collect();
        let labels: Vec<String> = decoded.references.iter().map(|l| l.trim().to_string()).collect();
        let new_records = augment(records, &predictions)?;

        let predictions_path = self.layout.predictions_path(split);
        let scores = match split {
            AugmentSplit::Test => {
                let (by_id_pred, by_id_ref) = keyed_texts(records, &predictions, &labels)?;
                let scores = self.scorer.get_scores(&by_id_pred, &by_id_ref)?;
                write_json_pretty(
                    &predictions_path,
                    &TestPredictions { scores: &scores, preds: &predictions, labels: &labels },
                )?;
                Some(scores)
            }
            AugmentSplit::Val => {
                write_json_pretty(&predictions_path, &ValPredictions { preds: &predictions, labels: &labels })?;
                None
            }
        };

        let records_path = self.layout.augmented_records_path(split);
        write_json_pretty(&records_path, &new_records)?;

        tracing::info!(
            split = split.as_str(),
            records = new_records.len(),
            path = %records_path.display(),
            "wrote augmented records"
        );

        Ok(Some(AugmentOutcome {
            split,
            predictions,
            labels,
            records: new_records,
            scores,
            artifacts: vec![
                make_artifact(ArtifactKind::Predictions, predictions_path)?,
                make_artifact(ArtifactKind::AugmentedRecords, records_path)?,
            ],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PreferenceLabel;

    fn records() -> Vec<Record> {
        ["a", "b", "c"]
            .into_iter()
            .map(|q| Record::new(q, vec![], "Casablanca (1942)", PreferenceLabel::Yes))
            .collect()
    }

    #[test]
    fn test_augment_returns_new_collection() {
        let original = records();
        let preds = vec!["p0".to_string(), "p1".to_string(), "p2".to_string()];
        let augmented = augment(&original, &preds).unwrap();

        assert!(original.iter().all(|r| r.pred_preference.is_none()));
        for (i, r) in augmented.iter().enumerate() {
            assert_eq!(r.pred_preference.as_deref(), Some(preds[i].as_str()));
            assert_eq!(r.qid, original[i].qid);
        }
    }

    #[test]
    fn test_augment_length_mismatch() {
        assert!(matches!(augment(&records(), &["x".to_string()]), Err(PrefgenError::DecodeInvariant(_))));
    }

    #[test]
    fn test_keyed_texts_preserve_record_order() {
        let mut recs = records();
        recs.reverse();
        let preds: Vec<String> = vec!["c!".into(), "b!".into(), "a!".into()];
        let (p, r) = keyed_texts(&recs, &preds, &preds).unwrap();
        assert_eq!(p.keys().collect::<Vec<_>>(), vec!["c", "b", "a"]);
        assert!(p.keys().eq(r.keys()));
        assert_eq!(p.get("b"), Some("b!"));
    }

    #[test]
    fn test_overlap_scorer_perfect_and_disjoint() {
        let recs = records();
        let texts: Vec<String> = vec!["likes old films".into(), "prefers comedy".into(), "enjoys drama".into()];
        let (p, r) = keyed_texts(&recs, &texts, &texts).unwrap();
        let scores = OverlapScorer::default().get_scores(&p, &r).unwrap();
        assert_eq!(scores["rouge_l"], 100.0);
        assert_eq!(scores["bleu_1"], 100.0);

        let other: Vec<String> = vec!["zzz".into(), "yyy".into(), "xxx".into()];
        let (p, r) = keyed_texts(&recs, &other, &texts).unwrap();
        let scores = OverlapScorer::default().get_scores(&p, &r).unwrap();
        assert_eq!(scores["rouge_1"], 0.0);
    }
}
