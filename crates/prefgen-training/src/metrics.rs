//! Turns evaluation-time token ids back into scored text.

use crate::error::{PrefgenError, PrefgenResult};
use crate::framework::{EvalPrediction, MetricCallback, Metrics, Predictions};
use crate::overlap::{RougeScorer, percent4, split_sentences};
use crate::tokenizer::{Tokenizer, prepare_batch_for_decode};
use std::sync::Arc;

/// Predicted and reference texts decoded from one batch, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    pub predictions: Vec<String>,
    pub references: Vec<String>,
    /// Non-pad token count per prediction.
    pub prediction_lengths: Vec<usize>,
}

/// Reduce, pad-substitute and decode a prediction batch with its references.
///
/// Shared by metric computation and prediction augmentation.
pub fn decode_predictions(
    tokenizer: &dyn Tokenizer,
    predictions: Predictions,
    label_ids: &[Vec<i64>],
) -> PrefgenResult<DecodedBatch> {
    let pred_ids = predictions.into_token_ids()?;
    if pred_ids.len() != label_ids.len() {
        return Err(PrefgenError::decode(format!(
            "{} predictions for {} references",
            pred_ids.len(),
            label_ids.len()
        )));
    }

    let pad = tokenizer.pad_token_id();
    let pred_ids = prepare_batch_for_decode(&pred_ids, pad)?;
    let label_ids = prepare_batch_for_decode(label_ids, pad)?;

    Ok(DecodedBatch {
        prediction_lengths: pred_ids.iter().map(|ids| ids.iter().filter(|&&id| id != pad).count()).collect(),
        predictions: tokenizer.batch_decode(&pred_ids, true)?,
        references: tokenizer.batch_decode(&label_ids, true)?,
    })
}

/// Trim, then put each sentence on its own line for `rougeLsum`.
#[must_use]
pub fn sentence_normalize(text: &str) -> String {
    split_sentences(text.trim()).join("\n")
}

/// ROUGE metric callback for rationale generation.
pub struct MetricEvaluator {
    tokenizer: Arc<dyn Tokenizer>,
    scorer: RougeScorer,
}

impl MetricEvaluator {
    #[must_use]
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer, scorer: RougeScorer { use_stemmer: true } }
    }
}

impl MetricCallback for MetricEvaluator {
    fn compute(&self, eval: EvalPrediction) -> PrefgenResult<Metrics> {
        let decoded = decode_predictions(self.tokenizer.as_ref(), eval.predictions, &eval.label_ids)?;

        let predictions: Vec<String> = decoded.predictions.iter().map(|p| sentence_normalize(p)).collect();
        let references: Vec<String> = decoded.references.iter().map(|r| sentence_normalize(r)).collect();

        let mut metrics: Metrics = self
            .scorer
            .aggregate(&references, &predictions)
            .into_iter()
            .map(|(k, v)| (k.to_string(), percent4(v)))
            .collect();

        let gen_len = if decoded.prediction_lengths.is_empty() {
            0.0
        } else {
            decoded.prediction_lengths.iter().sum::<usize>() as f64 / decoded.prediction_lengths.len() as f64
        };
        metrics.insert("gen_len".to_string(), gen_len);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{ByteTokenizer, IGNORE_INDEX};

    fn ids(text: &str) -> Vec<i64> {
        ByteTokenizer.encode(text).unwrap().into_iter().map(i64::from).collect()
    }

    fn evaluator() -> MetricEvaluator {
        MetricEvaluator::new(Arc::new(ByteTokenizer))
    }

    #[test]
    fn test_perfect_match_scores_100() {
        let mut label = ids("Likes noir. Avoids musicals.");
        label.extend([IGNORE_INDEX; 3]);
        let pred = ids("Likes noir. Avoids musicals.");
        let metrics = evaluator()
            .compute(EvalPrediction { predictions: Predictions::TokenIds(vec![pred.clone()]), label_ids: vec![label] })
            .unwrap();

        for key in ["rouge1", "rouge2", "rougeL", "rougeLsum"] {
            assert_eq!(metrics[key], 100.0, "{key}");
        }
        assert_eq!(metrics["gen_len"], pred.len() as f64);
    }

    #[test]
    fn test_sentinels_in_predictions_are_padded_before_decode() {
        let mut pred = ids("yes");
        pred.extend([IGNORE_INDEX; 5]);
        let metrics = evaluator()
            .compute(EvalPrediction { predictions: Predictions::TokenIds(vec![pred]), label_ids: vec![ids("yes")] })
            .unwrap();
        assert_eq!(metrics["rouge1"], 100.0);
        // three bytes + EOS; substituted pads are not counted
        assert_eq!(metrics["gen_len"], 4.0);
    }

    #[test]
    fn test_logits_and_tuples() {
        let tok = ByteTokenizer;
        let target = tok.encode("ok").unwrap();
        let logits: Vec<Vec<f32>> = target
            .iter()
            .map(|&id| {
                let mut row = vec![0.0; tok.vocab_size()];
                row[id as usize] = 1.0;
                row
            })
            .collect();
        let preds = Predictions::Tuple(vec![Predictions::Logits(vec![logits]), Predictions::TokenIds(vec![])]);
        let metrics = evaluator().compute(EvalPrediction { predictions: preds, label_ids: vec![ids("ok")] }).unwrap();
        assert_eq!(metrics["rougeL"], 100.0);
    }

    #[test]
    fn test_partial_overlap_is_rounded() {
        let metrics = evaluator()
            .compute(EvalPrediction {
                predictions: Predictions::TokenIds(vec![ids("the user likes old westerns")]),
                label_ids: vec![ids("the user likes westerns")],
            })
            .unwrap();
        // P = 4/5, R = 1 → F = 0.888..
        assert_eq!(metrics["rouge1"], 88.8889);
    }

    #[test]
    fn test_batch_size_mismatch_is_decode_violation() {
        let err = evaluator()
            .compute(EvalPrediction {
                predictions: Predictions::TokenIds(vec![ids("a"), ids("b")]),
                label_ids: vec![ids("a")],
            })
            .unwrap_err();
        assert!(matches!(err, PrefgenError::DecodeInvariant(_)));
    }

    #[test]
    fn test_sentence_normalize() {
        assert_eq!(sentence_normalize("  One. Two!  "), "One.\nTwo!");
    }
}
