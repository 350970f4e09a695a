//! Text-overlap scoring: ROUGE-1/2/L/Lsum and BLEU.
//!
//! Tokenization matches the usual ROUGE scorer: lowercase, every
//! non-alphanumeric run becomes a separator, and with stemming enabled tokens
//! longer than three characters are stemmed.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
static STEMMER: Lazy<Stemmer> = Lazy::new(|| Stemmer::create(Algorithm::English));

/// Precision / recall / F-measure triple, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

impl Score {
    fn from_counts(hits: usize, hyp_total: usize, ref_total: usize) -> Self {
        if hyp_total == 0 || ref_total == 0 {
            return Self::default();
        }
        let precision = hits as f64 / hyp_total as f64;
        let recall = hits as f64 / ref_total as f64;
        let fmeasure = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self { precision, recall, fmeasure }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RougeScorer {
    pub use_stemmer: bool,
}

impl Default for RougeScorer {
    fn default() -> Self {
        Self { use_stemmer: true }
    }
}

/// Per-pair ROUGE scores.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RougeScores {
    pub rouge1: Score,
    pub rouge2: Score,
    pub rouge_l: Score,
    pub rouge_lsum: Score,
}

impl RougeScorer {
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        NON_ALNUM
            .split(&lowered)
            .filter(|t| !t.is_empty())
            .map(|t| {
                if self.use_stemmer && t.len() > 3 {
                    STEMMER.stem(t).into_owned()
                } else {
                    t.to_string()
                }
            })
            .collect()
    }

    /// Score one hypothesis against one reference. `rougeLsum` treats `\n` as
    /// the sentence separator.
    #[must_use]
    pub fn score(&self, reference: &str, hypothesis: &str) -> RougeScores {
        let ref_tokens = self.tokenize(reference);
        let hyp_tokens = self.tokenize(hypothesis);

        RougeScores {
            rouge1: rouge_n(&ref_tokens, &hyp_tokens, 1),
            rouge2: rouge_n(&ref_tokens, &hyp_tokens, 2),
            rouge_l: Score::from_counts(lcs_length(&ref_tokens, &hyp_tokens), hyp_tokens.len(), ref_tokens.len()),
            rouge_lsum: self.summary_level_lcs(reference, hypothesis),
        }
    }

    /// Mean F-measure of each ROUGE variant over aligned pairs.
    #[must_use]
    pub fn aggregate(&self, references: &[String], hypotheses: &[String]) -> HashMap<&'static str, f64> {
        let mut sums = [0.0f64; 4];
        for (reference, hypothesis) in references.iter().zip(hypotheses) {
            let s = self.score(reference, hypothesis);
            sums[0] += s.rouge1.fmeasure;
            sums[1] += s.rouge2.fmeasure;
            sums[2] += s.rouge_l.fmeasure;
            sums[3] += s.rouge_lsum.fmeasure;
        }
        let n = references.len().min(hypotheses.len()).max(1) as f64;
        ["rouge1", "rouge2", "rougeL", "rougeLsum"]
            .into_iter()
            .zip(sums)
            .map(|(k, v)| (k, v / n))
            .collect()
    }

    fn summary_level_lcs(&self, reference: &str, hypothesis: &str) -> Score {
        let ref_sents: Vec<Vec<String>> =
            reference.split('\n').map(|s| self.tokenize(s)).filter(|s| !s.is_empty()).collect();
        let hyp_sents: Vec<Vec<String>> =
            hypothesis.split('\n').map(|s| self.tokenize(s)).filter(|s| !s.is_empty()).collect();

        let ref_total: usize = ref_sents.iter().map(Vec::len).sum();
        let hyp_total: usize = hyp_sents.iter().map(Vec::len).sum();
        if ref_total == 0 || hyp_total == 0 {
            return Score::default();
        }

        let mut ref_counts = token_counts(ref_sents.iter().flatten());
        let mut hyp_counts = token_counts(hyp_sents.iter().flatten());

        let mut hits = 0;
        for r in &ref_sents {
            for token in union_lcs(r, &hyp_sents) {
                let (Some(rc), Some(hc)) = (ref_counts.get_mut(token), hyp_counts.get_mut(token)) else {
                    continue;
                };
                if *rc > 0 && *hc > 0 {
                    hits += 1;
                    *rc -= 1;
                    *hc -= 1;
                }
            }
        }

        Score::from_counts(hits, hyp_total, ref_total)
    }
}

fn token_counts<'a>(tokens: impl Iterator<Item = &'a String>) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    counts
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

fn rouge_n(reference: &[String], hypothesis: &[String], n: usize) -> Score {
    let ref_ngrams = ngram_counts(reference, n);
    let hyp_ngrams = ngram_counts(hypothesis, n);

    let hits: usize = hyp_ngrams
        .iter()
        .map(|(ngram, &count)| count.min(ref_ngrams.get(ngram).copied().unwrap_or(0)))
        .sum();

    Score::from_counts(hits, hyp_ngrams.values().sum(), ref_ngrams.values().sum())
}

fn lcs_table(a: &[String], b: &[String]) -> Vec<Vec<usize>> {
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    lcs_table(a, b)[a.len()][b.len()]
}

/// Indices into `reference` that belong to one LCS with `candidate`.
fn lcs_indices(reference: &[String], candidate: &[String]) -> Vec<usize> {
    let table = lcs_table(reference, candidate);
    let (mut i, mut j) = (reference.len(), candidate.len());
    let mut out = Vec::new();
    while i > 0 && j > 0 {
        if reference[i - 1] == candidate[j - 1] {
            out.push(i - 1);
            i -= 1;
            j -= 1;
        } else if table[i][j - 1] > table[i - 1][j] {
            j -= 1;
        } else {
            i -= 1;
        }
    }
    out.reverse();
    out
}

/// Tokens of `reference` covered by the union of its LCS with each candidate sentence.
fn union_lcs<'a>(reference: &'a [String], candidates: &[Vec<String>]) -> Vec<&'a str> {
    let mut hit = vec![false; reference.len()];
    for c in candidates {
        for idx in lcs_indices(reference, c) {
            hit[idx] = true;
        }
    }
    reference.iter().zip(hit).filter(|(_, h)| *h).map(|(t, _)| t.as_str()).collect()
}

/// Sentence-level BLEU with uniform weights up to `max_n` and brevity penalty.
#[must_use]
pub fn bleu(reference: &[String], hypothesis: &[String], max_n: usize) -> f64 {
    if reference.is_empty() || hypothesis.is_empty() || max_n == 0 {
        return 0.0;
    }

    let mut log_precisions = 0.0;
    for n in 1..=max_n {
        let hyp_ngrams = ngram_counts(hypothesis, n);
        let ref_ngrams = ngram_counts(reference, n);
        let total: usize = hyp_ngrams.values().sum();
        if total == 0 {
            return 0.0;
        }
        let clipped: usize = hyp_ngrams
            .iter()
            .map(|(ngram, &count)| count.min(ref_ngrams.get(ngram).copied().unwrap_or(0)))
            .sum();
        if clipped == 0 {
            return 0.0;
        }
        log_precisions += (clipped as f64 / total as f64).ln();
    }

    let bp = if hypothesis.len() >= reference.len() {
        1.0
    } else {
        (1.0 - reference.len() as f64 / hypothesis.len() as f64).exp()
    };

    bp * (log_precisions / max_n as f64).exp()
}

/// Split at `.`, `!` or `?` followed by whitespace. Boundaries keep their punctuation.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    let sentence = text[start..next_idx].trim();
                    if !sentence.is_empty() {
                        out.push(sentence);
                    }
                    start = idx + ch.len_utf8();
                }
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Round `value * 100` to four decimal places.
#[must_use]
pub fn percent4(value: f64) -> f64 {
    (value * 100.0 * 10_000.0).round() / 10_000.0
}
