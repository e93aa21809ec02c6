//! Prosody / pause analyzer (SPEC_FULL.md §4.F).
//!
//! Grounded on `transcription/temporal_analyzer.rs`'s shape — walk a
//! sequence of timed units and classify the relationship between
//! neighbors — adapted from the reference crate's overlap detection
//! between ASR segments to structural gap classification between book
//! words.

use thiserror::Error;

use crate::config::ProsodyParams;
use crate::error::ErrorKind;
use crate::model::book::BookIndex;
use crate::model::pause::{PauseClass, PauseClassSummary, PauseSpan};
use crate::model::transcript::HydratedTranscript;

#[derive(Debug, Error)]
pub enum ProsodyError {
    #[error("hydrated transcript has {transcript_words} words but book has {book_words}")]
    WordCountMismatch { transcript_words: usize, book_words: usize },
}

impl ProsodyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DataIntegrityError
    }
}

/// Full output of one prosody pass: every classified gap plus the
/// per-class aggregate statistics §4.F asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct PauseAnalysis {
    pub spans: Vec<PauseSpan>,
    pub summaries: Vec<PauseClassSummary>,
}

/// Walks every pair of consecutive words in `transcript`, classifying the
/// gap between their timings by the surrounding structural context in
/// `book`, then aggregates by class. `chapter_duration_sec` anchors the
/// pre-first-word and post-last-word `Tail` spans.
pub fn analyze_pauses(
    book: &BookIndex,
    transcript: &HydratedTranscript,
    chapter_duration_sec: f64,
    _params: &ProsodyParams,
) -> Result<PauseAnalysis, ProsodyError> {
    if transcript.words.len() != book.words.len() {
        return Err(ProsodyError::WordCountMismatch {
            transcript_words: transcript.words.len(),
            book_words: book.words.len(),
        });
    }

    let mut spans = Vec::new();

    if let Some(first) = transcript.words.first() {
        if let Some(start) = first.start_sec {
            if start > 0.0 {
                spans.push(PauseSpan { start_sec: 0.0, end_sec: start, class: PauseClass::Tail });
            }
        }
    }

    for i in 0..transcript.words.len().saturating_sub(1) {
        let prev = &transcript.words[i];
        let next = &transcript.words[i + 1];
        if let (Some(prev_end), Some(next_start)) = (prev.end_sec, next.start_sec) {
            let class = classify_gap(book, i, i + 1);
            spans.push(PauseSpan { start_sec: prev_end, end_sec: next_start, class });
        }
    }

    if let Some(last) = transcript.words.last() {
        if let Some(end) = last.end_sec {
            if end < chapter_duration_sec {
                spans.push(PauseSpan { start_sec: end, end_sec: chapter_duration_sec, class: PauseClass::Tail });
            }
        }
    }

    let summaries = summarize(&spans);

    Ok(PauseAnalysis { spans, summaries })
}

/// Classifies the gap between book words `prev_idx` and `next_idx` by
/// their sentence/paragraph/section membership (§4.F). Section-boundary
/// gaps favor `ChapterHead` when the next word opens its section and
/// `PostChapterRead` when the previous word closes its own — the one
/// structural tie-break SPEC_FULL.md leaves to the implementation (see
/// DESIGN.md).
fn classify_gap(book: &BookIndex, prev_idx: usize, next_idx: usize) -> PauseClass {
    let prev_word = &book.words[prev_idx];
    let next_word = &book.words[next_idx];

    if prev_word.sentence_index == next_word.sentence_index {
        return if ends_with_comma(&prev_word.text) { PauseClass::Comma } else { PauseClass::Other };
    }

    if prev_word.section_index != next_word.section_index {
        let next_section = book.sections.get(next_word.section_index);
        let prev_section = book.sections.get(prev_word.section_index);
        let opens_section = next_section.is_some_and(|s| s.start_word == next_word.word_index);
        let closes_section = prev_section.is_some_and(|s| s.end_word == prev_word.word_index);
        return if opens_section {
            PauseClass::ChapterHead
        } else if closes_section {
            PauseClass::PostChapterRead
        } else {
            PauseClass::Paragraph
        };
    }

    if prev_word.paragraph_index != next_word.paragraph_index {
        return PauseClass::Paragraph;
    }

    PauseClass::Sentence
}

fn ends_with_comma(token: &str) -> bool {
    token.trim_end_matches(['"', '\'', ')', ']', '}', '\u{201d}', '\u{2019}']).ends_with(',')
}

fn summarize(spans: &[PauseSpan]) -> Vec<PauseClassSummary> {
    let classes = [
        PauseClass::Comma,
        PauseClass::Sentence,
        PauseClass::Paragraph,
        PauseClass::ChapterHead,
        PauseClass::PostChapterRead,
        PauseClass::Tail,
        PauseClass::Other,
    ];
    classes
        .into_iter()
        .map(|class| {
            let durations: Vec<f64> =
                spans.iter().filter(|s| s.class == class).map(|s| s.duration()).collect();
            PauseClassSummary::from_durations(class, &durations)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::book::{BookTotals, BookWord, ParagraphRange, SectionKind, SectionRange, SentenceRange};
    use crate::model::transcript::{TimingSource, TranscriptSentence, TranscriptWord};
    use chrono::Utc;

    fn word(idx: usize, text: &str, sentence: usize, paragraph: usize, section: usize) -> BookWord {
        BookWord {
            text: text.into(),
            word_index: idx,
            sentence_index: sentence,
            paragraph_index: paragraph,
            section_index: section,
            phonemes: None,
        }
    }

    fn tword(idx: usize, text: &str, start: f64, end: f64) -> TranscriptWord {
        TranscriptWord {
            word_index: idx,
            text: text.into(),
            start_sec: Some(start),
            end_sec: Some(end),
            source: TimingSource::Asr,
        }
    }

    fn sample_book() -> BookIndex {
        BookIndex {
            source_file: "book.txt".into(),
            source_file_hash: "hash".into(),
            indexed_at: Utc::now(),
            title: None,
            author: None,
            totals: BookTotals { word_count: 5, sentence_count: 3, paragraph_count: 2, section_count: 1 },
            words: vec![
                word(0, "Hello,", 0, 0, 0),
                word(1, "world.", 0, 0, 0),
                word(2, "New", 1, 1, 0),
                word(3, "start.", 1, 1, 0),
                word(4, "Tail.", 2, 1, 0),
            ],
            sentences: vec![
                SentenceRange { id: 0, start_word: 0, end_word: 1, paragraph_index: 0 },
                SentenceRange { id: 1, start_word: 2, end_word: 3, paragraph_index: 1 },
                SentenceRange { id: 2, start_word: 4, end_word: 4, paragraph_index: 1 },
            ],
            paragraphs: vec![
                ParagraphRange { id: 0, start_word: 0, end_word: 1, section_index: 0, first_sentence: 0, last_sentence: 0 },
                ParagraphRange { id: 1, start_word: 2, end_word: 4, section_index: 0, first_sentence: 1, last_sentence: 2 },
            ],
            sections: vec![SectionRange {
                id: 0,
                title: "Chapter One".into(),
                level: 1,
                kind: SectionKind::Chapter,
                start_word: 0,
                end_word: 4,
            }],
            build_warnings: vec![],
        }
    }

    fn sample_transcript() -> HydratedTranscript {
        HydratedTranscript {
            chapter_id: "ch1".into(),
            book_source_hash: "hash".into(),
            words: vec![
                tword(0, "Hello,", 0.0, 0.3),
                tword(1, "world.", 0.35, 0.6),
                tword(2, "New", 0.9, 1.0),
                tword(3, "start.", 1.0, 1.3),
                tword(4, "Tail.", 1.4, 1.7),
            ],
            sentences: vec![
                TranscriptSentence { id: 0, start_word: 0, end_word: 1, start_sec: Some(0.0), end_sec: Some(0.6) },
                TranscriptSentence { id: 1, start_word: 2, end_word: 3, start_sec: Some(0.9), end_sec: Some(1.3) },
                TranscriptSentence { id: 2, start_word: 4, end_word: 4, start_sec: Some(1.4), end_sec: Some(1.7) },
            ],
            sentence_aligns: vec![],
            paragraph_aligns: vec![],
        }
    }

    #[test]
    fn comma_terminated_intra_sentence_gap_is_classified_comma() {
        let book = sample_book();
        let transcript = sample_transcript();
        let analysis = analyze_pauses(&book, &transcript, 2.0, &ProsodyParams::default()).unwrap();
        let gap01 = analysis.spans.iter().find(|s| s.start_sec == 0.3).unwrap();
        assert_eq!(gap01.class, PauseClass::Comma);
    }

    #[test]
    fn paragraph_crossing_gap_is_classified_paragraph() {
        let book = sample_book();
        let transcript = sample_transcript();
        let analysis = analyze_pauses(&book, &transcript, 2.0, &ProsodyParams::default()).unwrap();
        let gap12 = analysis.spans.iter().find(|s| s.start_sec == 0.6).unwrap();
        assert_eq!(gap12.class, PauseClass::Paragraph);
    }

    #[test]
    fn tail_spans_bracket_the_chapter() {
        let book = sample_book();
        let mut transcript = sample_transcript();
        transcript.words[0].start_sec = Some(0.2);
        let analysis = analyze_pauses(&book, &transcript, 2.0, &ProsodyParams::default()).unwrap();
        assert!(analysis.spans.iter().any(|s| s.class == PauseClass::Tail && s.start_sec == 0.0));
        assert!(analysis.spans.iter().any(|s| s.class == PauseClass::Tail && s.end_sec == 2.0));
    }

    #[test]
    fn summaries_cover_every_class_even_when_empty() {
        let book = sample_book();
        let transcript = sample_transcript();
        let analysis = analyze_pauses(&book, &transcript, 2.0, &ProsodyParams::default()).unwrap();
        assert_eq!(analysis.summaries.len(), 7);
        let chapter_head = analysis.summaries.iter().find(|s| s.class == PauseClass::ChapterHead).unwrap();
        assert_eq!(chapter_head.count, 0);
    }

    #[test]
    fn word_count_mismatch_is_rejected() {
        let book = sample_book();
        let mut transcript = sample_transcript();
        transcript.words.pop();
        let result = analyze_pauses(&book, &transcript, 2.0, &ProsodyParams::default());
        assert!(result.is_err());
    }
}
