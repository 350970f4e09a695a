//! Batch collation for seq2seq training.

use crate::encoding::EncodedExample;
use crate::tokenizer::IGNORE_INDEX;

/// Pads each batch to its longest member.
#[derive(Debug, Clone, Copy)]
pub struct Seq2SeqCollator {
    pub pad_token_id: u32,
    pub label_pad_token_id: i64,
}

impl Seq2SeqCollator {
    #[must_use]
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id, label_pad_token_id: IGNORE_INDEX }
    }

    #[must_use]
    pub fn collate(&self, examples: &[&EncodedExample]) -> CollatedBatch {
        let input_width = examples.iter().map(|e| e.input_ids.len()).max().unwrap_or(0);
        let label_width = examples.iter().map(|e| e.labels.len()).max().unwrap_or(0);

        let mut batch = CollatedBatch {
            input_ids: Vec::with_capacity(examples.len()),
            attention_mask: Vec::with_capacity(examples.len()),
            labels: Vec::with_capacity(examples.len()),
        };

        for ex in examples {
            let mut input_ids = ex.input_ids.clone();
            input_ids.resize(input_width, self.pad_token_id);
            let mut attention_mask = ex.attention_mask.clone();
            attention_mask.resize(input_width, 0);
            let mut labels = ex.labels.clone();
            labels.resize(label_width, self.label_pad_token_id);

            batch.input_ids.push(input_ids);
            batch.attention_mask.push(attention_mask);
            batch.labels.push(labels);
        }

        batch
    }
}

/// A padded batch `[batch, width]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollatedBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub labels: Vec<Vec<i64>>,
}

impl CollatedBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}
