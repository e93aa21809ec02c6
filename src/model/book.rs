//! Book index data model (SPEC_FULL.md §3, §4.B).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single lexical token from the manuscript.
///
/// `text` preserves original casing and punctuation exactly as it appeared in
/// the source paragraph; only tokens containing at least one letter or digit
/// become a `BookWord` (§4.B).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookWord {
    pub text: String,
    pub word_index: usize,
    pub sentence_index: usize,
    pub paragraph_index: usize,
    pub section_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phonemes: Option<Vec<String>>,
}

/// Inclusive `[start_word, end_word]` range of words making up one sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceRange {
    pub id: usize,
    pub start_word: usize,
    pub end_word: usize,
    pub paragraph_index: usize,
}

impl SentenceRange {
    pub fn len(&self) -> usize {
        self.end_word - self.start_word + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, word_index: usize) -> bool {
        word_index >= self.start_word && word_index <= self.end_word
    }
}

/// Inclusive `[start_word, end_word]` range of words making up one paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphRange {
    pub id: usize,
    pub start_word: usize,
    pub end_word: usize,
    pub section_index: usize,
    pub first_sentence: usize,
    pub last_sentence: usize,
}

/// Structural classification of a detected section heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Chapter,
    Prologue,
    Epilogue,
    Foreword,
    Afterword,
    Introduction,
    Appendix,
    Acknowledgments,
}

/// Inclusive `[start_word, end_word]` range of words making up one section
/// (chapter, prologue, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRange {
    pub id: usize,
    pub title: String,
    pub level: u8,
    pub kind: SectionKind,
    pub start_word: usize,
    pub end_word: usize,
}

/// Aggregate counts over a `BookIndex`, computed once at build time so
/// consumers don't have to re-derive them from the arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTotals {
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub section_count: usize,
}

/// The fully parsed and indexed manuscript: a set of flat arenas (words,
/// sentences, paragraphs, sections) addressed by integer id, per SPEC_FULL.md
/// §9's "cyclic object graphs → arena storage" redesign note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookIndex {
    pub source_file: String,
    pub source_file_hash: String,
    pub indexed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub totals: BookTotals,
    pub words: Vec<BookWord>,
    pub sentences: Vec<SentenceRange>,
    pub paragraphs: Vec<ParagraphRange>,
    pub sections: Vec<SectionRange>,
    pub build_warnings: Vec<String>,
}

impl BookIndex {
    /// True iff sentence ranges tile `[0, word_count)` exactly: every word
    /// index belongs to exactly one sentence and ranges never overlap
    /// (SPEC_FULL.md §8 universal invariant).
    pub fn sentences_tile_words(&self) -> bool {
        let mut covered = vec![false; self.totals.word_count];
        for sentence in &self.sentences {
            if sentence.end_word >= self.totals.word_count || sentence.start_word > sentence.end_word
            {
                return false;
            }
            for idx in sentence.start_word..=sentence.end_word {
                if covered[idx] {
                    return false;
                }
                covered[idx] = true;
            }
        }
        covered.into_iter().all(|c| c)
    }

    /// Equality ignoring `indexed_at`, used by the round-trip property test
    /// (SPEC_FULL.md §8).
    pub fn eq_ignoring_timestamp(&self, other: &BookIndex) -> bool {
        self.source_file == other.source_file
            && self.source_file_hash == other.source_file_hash
            && self.title == other.title
            && self.author == other.author
            && self.totals == other.totals
            && self.words == other.words
            && self.sentences == other.sentences
            && self.paragraphs == other.paragraphs
            && self.sections == other.sections
            && self.build_warnings == other.build_warnings
    }

    pub fn word(&self, index: usize) -> Option<&BookWord> {
        self.words.get(index)
    }

    pub fn sentence_of_word(&self, word_index: usize) -> Option<&SentenceRange> {
        self.words
            .get(word_index)
            .and_then(|w| self.sentences.get(w.sentence_index))
    }
}
