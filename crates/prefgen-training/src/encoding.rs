use crate::config::PromptFormat;
use crate::error::{PrefgenError, PrefgenResult};
use crate::prompt;
use crate::record::Record;
use crate::tokenizer::Tokenizer;

/// One tokenized record. Unpadded; see [`crate::collator::Seq2SeqCollator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
    pub labels: Vec<i64>,
}

/// Records of one split formatted and tokenized under a prompt format.
///
/// Every record is encoded up front, so a record the format cannot handle
/// fails construction instead of surfacing mid-training.
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    examples: Vec<EncodedExample>,
}

impl EncodedDataset {
    pub fn new(
        records: &[Record],
        tokenizer: &dyn Tokenizer,
        input_len: usize,
        output_len: usize,
        format: PromptFormat,
    ) -> PrefgenResult<Self> {
        if input_len == 0 || output_len == 0 {
            return Err(PrefgenError::config("input_len and output_len must be >= 1"));
        }

        let eos = tokenizer.eos_token_id();
        let examples = records
            .iter()
            .map(|record| {
                let pair = prompt::format(record, format)?;
                let input_ids = truncate_keep_eos(tokenizer.encode(&pair.input)?, input_len, eos);
                let target_ids = truncate_keep_eos(tokenizer.encode(&pair.target)?, output_len, eos);
                Ok(EncodedExample {
                    attention_mask: vec![1; input_ids.len()],
                    input_ids,
                    labels: target_ids.into_iter().map(i64::from).collect(),
                })
            })
            .collect::<PrefgenResult<Vec<_>>>()?;

        Ok(Self { examples })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&EncodedExample> {
        self.examples.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EncodedExample> {
        self.examples.iter()
    }
}

impl<'a> IntoIterator for &'a EncodedDataset {
    type Item = &'a EncodedExample;
    type IntoIter = std::slice::Iter<'a, EncodedExample>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.iter()
    }
}

/// Cut from the end, keeping EOS as the final id.
fn truncate_keep_eos(mut ids: Vec<u32>, max_len: usize, eos: u32) -> Vec<u32> {
    if ids.len() > max_len {
        ids.truncate(max_len - 1);
        ids.push(eos);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PreferenceLabel;
    use crate::tokenizer::{ByteTokenizer, prepare_for_decode};

    fn records() -> Vec<Record> {
        vec![
            Record::new("a", vec!["Heat (1995)".to_string()], "Ronin (1998)", PreferenceLabel::Yes)
                .with_preference("Enjoys   heist thrillers with strong ensembles."),
            Record::new("b", vec![], "Clue (1985)", PreferenceLabel::No).with_preference("Prefers drama."),
        ]
    }

    #[test]
    fn test_len_and_indexed_access() {
        let ds = EncodedDataset::new(&records(), &ByteTokenizer, 512, 64, PromptFormat::RecA).unwrap();
        assert_eq!(ds.len(), 2);
        let ex = ds.get(1).unwrap();
        assert_eq!(ex.input_ids.len(), ex.attention_mask.len());
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_labels_decode_to_target() {
        let tok = ByteTokenizer;
        let ds = EncodedDataset::new(&records(), &tok, 512, 128, PromptFormat::RecP).unwrap();
        let ids = prepare_for_decode(&ds.get(0).unwrap().labels, tok.pad_token_id()).unwrap();
        let text = tok.decode(&ids, true).unwrap();
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&text), "Enjoys heist thrillers with strong ensembles.");
    }

    #[test]
    fn test_long_target_is_truncated() {
        let tok = ByteTokenizer;
        let ds = EncodedDataset::new(&records(), &tok, 16, 8, PromptFormat::RecP).unwrap();
        let ex = ds.get(0).unwrap();
        assert_eq!(ex.input_ids.len(), 16);
        assert_eq!(ex.labels.len(), 8);
        assert_eq!(*ex.labels.last().unwrap(), i64::from(ByteTokenizer::EOS));

        let ids = prepare_for_decode(&ex.labels, tok.pad_token_id()).unwrap();
        assert_eq!(tok.decode(&ids, true).unwrap(), "Enjoys ");
    }

    #[test]
    fn test_truncation_inside_multibyte_char_decodes_to_prefix() {
        let tok = ByteTokenizer;
        let recs = vec![Record::new("c", vec![], "Amelie (2001)", PreferenceLabel::Yes).with_preference("Enjoys café culture")];
        // 11 bytes of text: "Enjoys caf" plus the first byte of 'é'
        let ds = EncodedDataset::new(&recs, &tok, 256, 12, PromptFormat::RecP).unwrap();

        let ids = prepare_for_decode(&ds.get(0).unwrap().labels, tok.pad_token_id()).unwrap();
        let text = tok.decode(&ids, true).unwrap();
        assert_eq!(text, "Enjoys caf");
        assert!("Enjoys café culture".starts_with(&text));
    }

    #[test]
    fn test_bad_record_fails_construction() {
        let mut recs = records();
        recs[1].preference = None;
        assert!(EncodedDataset::new(&recs, &ByteTokenizer, 64, 64, PromptFormat::RecPa).is_err());
    }
}
