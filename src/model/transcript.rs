//! Hydrated transcript data model (SPEC_FULL.md §3, §4.D, §4.E).

use serde::{Deserialize, Serialize};

use super::align::{ParagraphAlign, SentenceAlign};

/// Where a word's current timing came from. The timing merger (§4.E)
/// upgrades `Asr` to `ForcedAlignment` on a successful match and leaves
/// `Unmatched` words flagged for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSource {
    Asr,
    ForcedAlignment,
    Unmatched,
}

/// One book word annotated with its best-known timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptWord {
    pub word_index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_sec: Option<f64>,
    pub source: TimingSource,
}

/// One sentence annotated with its span timing, derived from its words.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSentence {
    pub id: usize,
    pub start_word: usize,
    pub end_word: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_sec: Option<f64>,
}

/// The book's word/sentence structure, annotated with ASR-derived or
/// forced-alignment timings, plus the rollup quality metrics produced by
/// the windowed aligner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydratedTranscript {
    pub chapter_id: String,
    pub book_source_hash: String,
    pub words: Vec<TranscriptWord>,
    pub sentences: Vec<TranscriptSentence>,
    pub sentence_aligns: Vec<SentenceAlign>,
    pub paragraph_aligns: Vec<ParagraphAlign>,
}

impl HydratedTranscript {
    pub fn word_mut(&mut self, word_index: usize) -> Option<&mut TranscriptWord> {
        self.words.get_mut(word_index)
    }

    /// Recomputes a sentence's `(start_sec, end_sec)` as the
    /// `(min(start), max(end))` over its words that currently have a
    /// timing, per §4.E. Returns `None` (leaving the sentence's existing
    /// timing untouched) if no word in range has a timing at all.
    pub fn recompute_sentence_span(&self, start_word: usize, end_word: usize) -> Option<(f64, f64)> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut found = false;
        for word in &self.words[start_word..=end_word] {
            if let (Some(s), Some(e)) = (word.start_sec, word.end_sec) {
                lo = lo.min(s);
                hi = hi.max(e);
                found = true;
            }
        }
        found.then_some((lo, hi))
    }
}
