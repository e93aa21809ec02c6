//! Timing merger: folds a forced-alignment time grid into a hydrated
//! transcript's word timings (SPEC_FULL.md §4.E).

pub mod textgrid;

use thiserror::Error;

use crate::anchor::filter::normalize_token;
use crate::error::ErrorKind;
use crate::model::timegrid::TimeGrid;
use crate::model::transcript::{HydratedTranscript, TimingSource};

#[derive(Debug, Error)]
pub enum TimingMergeError {
    #[error("time grid has no interval tier named {tier_name:?} and no interval tier at all")]
    NoIntervalTier { tier_name: String },
}

impl TimingMergeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalFailure
    }
}

/// Diagnostics from one merge pass, carried into the stage artifact for
/// later review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub matched: usize,
    pub unmatched_labels: Vec<String>,
}

/// Walks the grid's non-silence intervals in document order, matching each
/// to the next unassigned transcript word within `lookahead_words` (§4.E),
/// then recomputes every sentence's span from its (possibly mixed
/// ASR/forced-alignment) word timings.
pub fn merge_time_grid(
    transcript: &mut HydratedTranscript,
    grid: &TimeGrid,
    lookahead_words: usize,
) -> MergeReport {
    let mut cursor = 0usize;
    let mut report = MergeReport::default();

    for interval in grid.non_silence_intervals() {
        let normalized_label = normalize_token(&interval.label);
        if normalized_label.is_empty() {
            continue;
        }

        let window_end = (cursor + lookahead_words).min(transcript.words.len());
        let matched_at = (cursor..window_end).find(|&i| normalize_token(&transcript.words[i].text) == normalized_label);

        match matched_at {
            Some(i) => {
                transcript.words[i].start_sec = Some(interval.start_sec);
                transcript.words[i].end_sec = Some(interval.end_sec);
                transcript.words[i].source = TimingSource::ForcedAlignment;
                cursor = i + 1;
                report.matched += 1;
            }
            None => report.unmatched_labels.push(interval.label.clone()),
        }
    }

    let spans: Vec<_> =
        transcript.sentences.iter().map(|s| transcript.recompute_sentence_span(s.start_word, s.end_word)).collect();
    for (sentence, span) in transcript.sentences.iter_mut().zip(spans) {
        if let Some((lo, hi)) = span {
            sentence.start_sec = Some(lo);
            sentence.end_sec = Some(hi);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::align::{ParagraphAlign, RollupMetrics, RollupStatus, SentenceAlign};
    use crate::model::timegrid::TimeInterval;
    use crate::model::transcript::{TranscriptSentence, TranscriptWord};

    fn transcript() -> HydratedTranscript {
        HydratedTranscript {
            chapter_id: "ch1".into(),
            book_source_hash: "hash".into(),
            words: vec![
                word(0, "Hello"),
                word(1, "World."),
                word(2, "Again."),
            ],
            sentences: vec![TranscriptSentence {
                id: 0,
                start_word: 0,
                end_word: 2,
                start_sec: None,
                end_sec: None,
            }],
            sentence_aligns: vec![SentenceAlign {
                id: 0,
                book_start: 0,
                book_end: 2,
                asr_range: None,
                metrics: RollupMetrics { wer: 0.0, coverage: 1.0, missing_runs: 0 },
                status: RollupStatus::Ok,
            }],
            paragraph_aligns: vec![ParagraphAlign {
                id: 0,
                book_start: 0,
                book_end: 2,
                metrics: RollupMetrics { wer: 0.0, coverage: 1.0, missing_runs: 0 },
                status: RollupStatus::Ok,
            }],
        }
    }

    fn word(idx: usize, text: &str) -> TranscriptWord {
        TranscriptWord { word_index: idx, text: text.into(), start_sec: None, end_sec: None, source: TimingSource::Unmatched }
    }

    #[test]
    fn exact_label_match_upgrades_timing_source() {
        let mut transcript = transcript();
        let grid = TimeGrid {
            intervals: vec![
                TimeInterval { start_sec: 0.0, end_sec: 0.3, label: "sp".into() },
                TimeInterval { start_sec: 0.3, end_sec: 0.6, label: "hello".into() },
                TimeInterval { start_sec: 0.6, end_sec: 1.0, label: "world".into() },
            ],
        };
        let report = merge_time_grid(&mut transcript, &grid, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(transcript.words[0].source, TimingSource::ForcedAlignment);
        assert_eq!(transcript.words[0].start_sec, Some(0.0));
        assert_eq!(transcript.words[1].end_sec, Some(1.0));
        assert_eq!(transcript.words[2].source, TimingSource::Unmatched);
    }

    #[test]
    fn lookahead_tolerates_one_dropped_word() {
        let mut transcript = transcript();
        // "world" label arrives but word 1 ("World.") was skipped by the
        // aligner upstream; the merge should still find it within lookahead.
        let grid = TimeGrid {
            intervals: vec![TimeInterval { start_sec: 1.0, end_sec: 1.4, label: "again".into() }],
        };
        let report = merge_time_grid(&mut transcript, &grid, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(transcript.words[2].start_sec, Some(1.0));
    }

    #[test]
    fn unmatched_label_is_reported_and_leaves_timing_untouched() {
        let mut transcript = transcript();
        let grid = TimeGrid {
            intervals: vec![TimeInterval { start_sec: 0.0, end_sec: 0.3, label: "nonexistent".into() }],
        };
        let report = merge_time_grid(&mut transcript, &grid, 3);
        assert_eq!(report.unmatched_labels, vec!["nonexistent".to_string()]);
        assert!(transcript.words.iter().all(|w| w.start_sec.is_none()));
    }

    #[test]
    fn sentence_span_recomputed_after_merge() {
        let mut transcript = transcript();
        let grid = TimeGrid {
            intervals: vec![
                TimeInterval { start_sec: 0.1, end_sec: 0.4, label: "hello".into() },
                TimeInterval { start_sec: 0.4, end_sec: 0.9, label: "world".into() },
            ],
        };
        merge_time_grid(&mut transcript, &grid, 3);
        assert_eq!(transcript.sentences[0].start_sec, Some(0.1));
        assert_eq!(transcript.sentences[0].end_sec, Some(0.9));
    }
}
