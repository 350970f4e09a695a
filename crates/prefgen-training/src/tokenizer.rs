//! Tokenizer capability and the decode-preparation rule.
//!
//! Label batches use [`IGNORE_INDEX`] for positions excluded from the loss.
//! Those values must become the pad id before decoding; [`prepare_for_decode`]
//! is the only place that happens, and the decoder only accepts `u32` ids, so
//! a raw sentinel cannot reach it.

use crate::error::{PrefgenError, PrefgenResult};

/// Label value marking positions that carry no loss.
pub const IGNORE_INDEX: i64 = -100;

pub trait Tokenizer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Token ids for `text`, terminated by the EOS id. No truncation.
    fn encode(&self, text: &str) -> PrefgenResult<Vec<u32>>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> PrefgenResult<String>;

    fn batch_decode(&self, batch: &[Vec<u32>], skip_special_tokens: bool) -> PrefgenResult<Vec<String>> {
        batch.iter().map(|ids| self.decode(ids, skip_special_tokens)).collect()
    }

    fn pad_token_id(&self) -> u32;

    fn eos_token_id(&self) -> u32;

    fn vocab_size(&self) -> usize;
}

/// Replace every [`IGNORE_INDEX`] with `pad_token_id`.
///
/// Any other negative or out-of-range id means a caller skipped this step
/// or the framework produced garbage.
pub fn prepare_for_decode(ids: &[i64], pad_token_id: u32) -> PrefgenResult<Vec<u32>> {
    ids.iter()
        .map(|&id| {
            if id == IGNORE_INDEX {
                Ok(pad_token_id)
            } else {
                u32::try_from(id).map_err(|_| PrefgenError::decode(format!("token id {id} cannot be decoded")))
            }
        })
        .collect()
}

pub fn prepare_batch_for_decode(batch: &[Vec<i64>], pad_token_id: u32) -> PrefgenResult<Vec<Vec<u32>>> {
    batch.iter().map(|ids| prepare_for_decode(ids, pad_token_id)).collect()
}

/// Byte-level tokenizer: one id per UTF-8 byte, offset past the specials.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const PAD: u32 = 0;
    pub const EOS: u32 = 1;
    pub const UNK: u32 = 2;
    const OFFSET: u32 = 3;
}

impl Tokenizer for ByteTokenizer {
    fn id(&self) -> &'static str {
        "byte"
    }

    fn encode(&self, text: &str) -> PrefgenResult<Vec<u32>> {
        let mut ids: Vec<u32> = text.bytes().map(|b| u32::from(b) + Self::OFFSET).collect();
        ids.push(Self::EOS);
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> PrefgenResult<String> {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            match id {
                Self::PAD | Self::EOS | Self::UNK if skip_special_tokens => {}
                Self::PAD => bytes.extend_from_slice(b"<pad>"),
                Self::EOS => bytes.extend_from_slice(b"</s>"),
                Self::UNK => bytes.extend_from_slice(b"<unk>"),
                id => match u8::try_from(id - Self::OFFSET) {
                    Ok(b) => bytes.push(b),
                    Err(_) if skip_special_tokens => {}
                    Err(_) => bytes.extend_from_slice(b"<unk>"),
                },
            }
        }
        // Truncation can split a multi-byte character; incomplete sequences are dropped.
        Ok(bytes.utf8_chunks().map(|chunk| chunk.valid()).collect())
    }

    fn pad_token_id(&self) -> u32 {
        Self::PAD
    }

    fn eos_token_id(&self) -> u32 {
        Self::EOS
    }

    fn vocab_size(&self) -> usize {
        (Self::OFFSET + 256) as usize
    }
}

#[cfg(feature = "hf-tokenizers")]
pub use hf::HfTokenizer;

#[cfg(feature = "hf-tokenizers")]
mod hf {
    use super::Tokenizer;
    use crate::error::{PrefgenError, PrefgenResult};
    use std::path::Path;

    /// Adapter over a HuggingFace `tokenizer.json`.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
        pad: u32,
        eos: u32,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> PrefgenResult<Self> {
            let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
                PrefgenError::Framework(format!("cannot load tokenizer from '{}': {e}", path.display()))
            })?;
            let pad = inner
                .get_padding()
                .map(|p| p.pad_id)
                .or_else(|| inner.token_to_id("<pad>"))
                .unwrap_or(0);
            let eos = inner.token_to_id("</s>").unwrap_or(1);
            Ok(Self { inner, pad, eos })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn id(&self) -> &'static str {
            "hf"
        }

        fn encode(&self, text: &str) -> PrefgenResult<Vec<u32>> {
            let encoding = self
                .inner
                .encode(text, true)
                .map_err(|e| PrefgenError::Framework(format!("tokenizer encode failed: {e}")))?;
            let mut ids = encoding.get_ids().to_vec();
            if ids.last() != Some(&self.eos) {
                ids.push(self.eos);
            }
            Ok(ids)
        }

        fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> PrefgenResult<String> {
            self.inner
                .decode(ids, skip_special_tokens)
                .map_err(|e| PrefgenError::Framework(format!("tokenizer decode failed: {e}")))
        }

        fn pad_token_id(&self) -> u32 {
            self.pad
        }

        fn eos_token_id(&self) -> u32 {
            self.eos
        }

        fn vocab_size(&self) -> usize {
            self.inner.get_vocab_size(true)
        }
    }
}
