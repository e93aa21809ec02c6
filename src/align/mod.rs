//! Windowed aligner: per-window edit-distance DP, window concatenation,
//! sentence/paragraph rollups, and transcript hydration (SPEC_FULL.md §4.D).

pub mod cost;
pub mod dp;

use thiserror::Error;

use crate::anchor::AnchorResult;
use crate::config::AlignParams;
use crate::error::ErrorKind;
use crate::model::align::{
    AlignOp, AsrRange, ParagraphAlign, RollupMetrics, RollupStatus, SentenceAlign, WordAlign,
};
use crate::model::asr::AsrToken;
use crate::model::book::BookIndex;
use crate::model::transcript::{HydratedTranscript, TimingSource, TranscriptSentence, TranscriptWord};

use cost::CostModel;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("anchor window out of bounds: {0}")]
    WindowOutOfBounds(String),
}

impl AlignError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DataIntegrityError
    }
}

/// Full output of one alignment run: the concatenated op stream plus its
/// sentence- and paragraph-level rollups.
#[derive(Debug, Clone)]
pub struct AlignmentOutput {
    pub ops: Vec<WordAlign>,
    pub sentences: Vec<SentenceAlign>,
    pub paragraphs: Vec<ParagraphAlign>,
}

/// Runs the windowed DP over every window in `anchor_result`, stitching
/// windows together with synthetic `Match` ops at each anchor boundary
/// (§4.D's "Concatenation"), then computes rollups over `book`'s sentence
/// and paragraph ranges.
pub fn run_alignment(
    book: &BookIndex,
    asr_tokens: &[AsrToken],
    anchor_result: &AnchorResult,
    params: &AlignParams,
) -> Result<AlignmentOutput, AlignError> {
    let cost = CostModel::new(params);
    let book_view = &anchor_result.book_view;
    let asr_view = &anchor_result.asr_view;

    let mut ops = Vec::new();
    for (idx, window) in anchor_result.windows.iter().enumerate() {
        if window.b_hi > book_view.len() || window.a_hi > asr_view.len() {
            return Err(AlignError::WindowOutOfBounds(format!(
                "window {idx} exceeds filtered view bounds"
            )));
        }

        let book_tokens = &book_view.filtered[window.b_lo..window.b_hi];
        let asr_slice = &asr_view.filtered[window.a_lo..window.a_hi];
        let book_original = &book_view.filtered_to_original[window.b_lo..window.b_hi];
        let asr_original = &asr_view.filtered_to_original[window.a_lo..window.a_hi];

        ops.extend(dp::align_window(book_tokens, asr_slice, book_original, asr_original, &cost));

        if let Some(anchor) = anchor_result.anchors.get(idx) {
            ops.push(WordAlign {
                book_idx: Some(book_view.filtered_to_original[anchor.bp]),
                asr_idx: Some(asr_view.filtered_to_original[anchor.ap]),
                op: AlignOp::Match,
                reason: crate::model::align::AlignReason::EqualOrEquiv,
                score: 1.0,
            });
        }
    }

    let sentences: Vec<SentenceAlign> =
        book.sentences.iter().map(|s| sentence_rollup(s.id, s.start_word, s.end_word, &ops)).collect();

    let paragraphs: Vec<ParagraphAlign> = book
        .paragraphs
        .iter()
        .map(|p| {
            let in_paragraph: Vec<&SentenceAlign> =
                sentences.iter().filter(|s| s.book_start >= p.start_word && s.book_end <= p.end_word).collect();
            let metrics = average_metrics(in_paragraph.iter().map(|s| s.metrics));
            let status = RollupStatus::classify(metrics.wer, metrics.missing_runs);
            ParagraphAlign { id: p.id, book_start: p.start_word, book_end: p.end_word, metrics, status }
        })
        .collect();

    Ok(AlignmentOutput { ops, sentences, paragraphs })
}

fn sentence_rollup(id: usize, start: usize, end: usize, ops: &[WordAlign]) -> SentenceAlign {
    let in_range: Vec<&WordAlign> =
        ops.iter().filter(|op| op.book_idx.is_some_and(|b| b >= start && b <= end)).collect();

    let subs = in_range.iter().filter(|op| op.op == AlignOp::Sub).count();
    let dels = in_range.iter().filter(|op| op.op == AlignOp::Del).count();

    let asr_bounds = in_range
        .iter()
        .filter_map(|op| op.asr_idx)
        .fold(None, |acc: Option<(usize, usize)>, a| match acc {
            None => Some((a, a)),
            Some((lo, hi)) => Some((lo.min(a), hi.max(a))),
        });

    let ins = match asr_bounds {
        Some((lo, hi)) => {
            ops.iter().filter(|op| op.op == AlignOp::Ins && op.asr_idx.is_some_and(|a| a >= lo && a <= hi)).count()
        }
        None => 0,
    };

    let n = end - start + 1;
    let wer = (subs + dels + ins) as f32 / n.max(1) as f32;
    let coverage = 1.0 - dels as f32 / n.max(1) as f32;
    let status = RollupStatus::classify(wer, dels);

    SentenceAlign {
        id,
        book_start: start,
        book_end: end,
        asr_range: asr_bounds.map(|(start, end)| AsrRange { start, end }),
        metrics: RollupMetrics { wer, coverage, missing_runs: dels },
        status,
    }
}

fn average_metrics(metrics: impl Iterator<Item = RollupMetrics> + Clone) -> RollupMetrics {
    let count = metrics.clone().count().max(1) as f32;
    let wer = metrics.clone().map(|m| m.wer).sum::<f32>() / count;
    let coverage = metrics.clone().map(|m| m.coverage).sum::<f32>() / count;
    let missing_runs = (metrics.map(|m| m.missing_runs).sum::<usize>() as f32 / count).round() as usize;
    RollupMetrics { wer, coverage, missing_runs }
}

/// Builds a `HydratedTranscript` from the book's word structure, the raw ASR
/// tokens (for `Asr`-sourced timing), and the alignment output: every book
/// word gets its matched ASR token's timing when one exists (`Match`/`Sub`),
/// or no timing at all when it was deleted.
pub fn hydrate(
    chapter_id: &str,
    book: &BookIndex,
    asr_tokens: &[AsrToken],
    alignment: &AlignmentOutput,
) -> HydratedTranscript {
    let mut words: Vec<TranscriptWord> = book
        .words
        .iter()
        .map(|w| TranscriptWord {
            word_index: w.word_index,
            text: w.text.clone(),
            start_sec: None,
            end_sec: None,
            source: TimingSource::Unmatched,
        })
        .collect();

    for op in &alignment.ops {
        if let (Some(book_idx), Some(asr_idx)) = (op.book_idx, op.asr_idx) {
            if matches!(op.op, AlignOp::Match | AlignOp::Sub) {
                if let Some(token) = asr_tokens.get(asr_idx) {
                    if let Some(word) = words.get_mut(book_idx) {
                        word.start_sec = Some(token.start_sec);
                        word.end_sec = Some(token.end_sec);
                        word.source = TimingSource::Asr;
                    }
                }
            }
        }
    }

    let transcript_skeleton = HydratedTranscript {
        chapter_id: chapter_id.to_string(),
        book_source_hash: book.source_file_hash.clone(),
        words,
        sentences: Vec::new(),
        sentence_aligns: alignment.sentences.clone(),
        paragraph_aligns: alignment.paragraphs.clone(),
    };

    let sentences = book
        .sentences
        .iter()
        .map(|s| {
            let span = transcript_skeleton.recompute_sentence_span(s.start_word, s.end_word);
            TranscriptSentence {
                id: s.id,
                start_word: s.start_word,
                end_word: s.end_word,
                start_sec: span.map(|(lo, _)| lo),
                end_sec: span.map(|(_, hi)| hi),
            }
        })
        .collect();

    HydratedTranscript { sentences, ..transcript_skeleton }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::filter::FilteredView;
    use crate::model::anchor::{Anchor, AnchorWindow};
    use crate::model::book::{BookTotals, BookWord, ParagraphRange, SentenceRange};
    use chrono::Utc;

    fn book_with_two_sentences() -> BookIndex {
        BookIndex {
            source_file: "book.txt".into(),
            source_file_hash: "hash".into(),
            indexed_at: Utc::now(),
            title: None,
            author: None,
            totals: BookTotals { word_count: 4, sentence_count: 2, paragraph_count: 1, section_count: 0 },
            words: vec![
                word(0, "the", 0),
                word(1, "fox.", 0),
                word(2, "it", 1),
                word(3, "ran.", 1),
            ],
            sentences: vec![
                SentenceRange { id: 0, start_word: 0, end_word: 1, paragraph_index: 0 },
                SentenceRange { id: 1, start_word: 2, end_word: 3, paragraph_index: 0 },
            ],
            paragraphs: vec![ParagraphRange {
                id: 0,
                start_word: 0,
                end_word: 3,
                section_index: 0,
                first_sentence: 0,
                last_sentence: 1,
            }],
            sections: vec![],
            build_warnings: vec![],
        }
    }

    fn word(word_index: usize, text: &str, sentence_index: usize) -> BookWord {
        BookWord { text: text.into(), word_index, sentence_index, paragraph_index: 0, section_index: 0, phonemes: None }
    }

    fn token(text: &str, start: f64, end: f64) -> AsrToken {
        AsrToken { text: text.into(), start_sec: start, end_sec: end, confidence: None }
    }

    #[test]
    fn perfect_match_run_yields_ok_status_and_full_coverage() {
        let book = book_with_two_sentences();
        let asr_tokens = vec![token("the", 0.0, 0.2), token("fox", 0.2, 0.5), token("it", 0.6, 0.7), token("ran", 0.7, 1.0)];
        let book_view = FilteredView::build(book.words.iter().map(|w| w.text.as_str()));
        let asr_view = FilteredView::build(asr_tokens.iter().map(|t| t.text.as_str()));
        let anchor_result = AnchorResult {
            anchors: vec![],
            windows: vec![AnchorWindow { b_lo: 0, b_hi: book_view.len(), a_lo: 0, a_hi: asr_view.len() }],
            book_view,
            asr_view,
        };
        let params = AlignParams::default();
        let output = run_alignment(&book, &asr_tokens, &anchor_result, &params).unwrap();
        assert!(output.ops.iter().all(|op| op.op == AlignOp::Match));
        assert_eq!(output.sentences.len(), 2);
        assert!(output.sentences.iter().all(|s| s.status == RollupStatus::Ok));
        assert!(output.sentences.iter().all(|s| s.metrics.coverage == 1.0));
    }

    #[test]
    fn hydrate_assigns_asr_timing_to_matched_words() {
        let book = book_with_two_sentences();
        let asr_tokens = vec![token("the", 0.0, 0.2), token("fox", 0.2, 0.5), token("it", 0.6, 0.7), token("ran", 0.7, 1.0)];
        let book_view = FilteredView::build(book.words.iter().map(|w| w.text.as_str()));
        let asr_view = FilteredView::build(asr_tokens.iter().map(|t| t.text.as_str()));
        let anchor_result = AnchorResult {
            anchors: vec![],
            windows: vec![AnchorWindow { b_lo: 0, b_hi: book_view.len(), a_lo: 0, a_hi: asr_view.len() }],
            book_view,
            asr_view,
        };
        let params = AlignParams::default();
        let output = run_alignment(&book, &asr_tokens, &anchor_result, &params).unwrap();
        let transcript = hydrate("ch1", &book, &asr_tokens, &output);
        assert!(transcript.words.iter().all(|w| w.source == TimingSource::Asr));
        assert_eq!(transcript.sentences[0].start_sec, Some(0.0));
        assert_eq!(transcript.sentences[0].end_sec, Some(0.5));
    }

    #[test]
    fn anchor_boundary_gets_a_synthetic_match() {
        let book_words = vec!["alpha", "beta", "gamma", "delta"];
        let asr_words = vec!["alpha", "beta", "gamma", "delta"];
        let book_view = FilteredView::build(book_words.into_iter());
        let asr_view = FilteredView::build(asr_words.into_iter());
        let anchors = vec![Anchor { bp: 1, ap: 1 }];
        let windows = crate::anchor::build_windows(&anchors, (0, book_view.len()), (0, asr_view.len()));
        let anchor_result = AnchorResult { anchors, windows, book_view, asr_view };

        let mut book = book_with_two_sentences();
        book.totals.word_count = 4;
        let asr_tokens =
            vec![token("alpha", 0.0, 0.1), token("beta", 0.1, 0.2), token("gamma", 0.2, 0.3), token("delta", 0.3, 0.4)];
        let params = AlignParams::default();
        let output = run_alignment(&book, &asr_tokens, &anchor_result, &params).unwrap();
        assert!(output.ops.iter().any(|op| op.book_idx == Some(1) && op.asr_idx == Some(1) && op.op == AlignOp::Match));
    }
}
