//! Anchor engine: locates a sparse set of trusted book/ASR correspondences
//! and carves the remaining text into bounded alignment windows
//! (SPEC_FULL.md §4.C).

pub mod filter;
pub mod lis;
pub mod ngram;

use std::collections::HashSet;

use thiserror::Error;

use crate::config::AnchorParams;
use crate::error::ErrorKind;
use crate::model::anchor::{Anchor, AnchorWindow};
use crate::model::asr::AsrToken;
use crate::model::book::BookIndex;

use filter::FilteredView;

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("anchor params invalid: {0}")]
    InvalidParams(String),
}

impl AnchorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigError
    }
}

/// The output of a single anchor-discovery run: the monotone anchor chain
/// plus the alignment windows it carves the filtered token ranges into.
#[derive(Debug, Clone)]
pub struct AnchorResult {
    pub anchors: Vec<Anchor>,
    pub windows: Vec<AnchorWindow>,
    pub book_view: FilteredView,
    pub asr_view: FilteredView,
}

pub struct AnchorEngine<'a> {
    params: &'a AnchorParams,
}

impl<'a> AnchorEngine<'a> {
    pub fn new(params: &'a AnchorParams) -> AnchorEngine<'a> {
        AnchorEngine { params }
    }

    /// Runs the full §4.C pipeline: filter both token streams, narrow the
    /// book search range to the best-matching section when possible,
    /// generate n-gram candidates with density-driven relaxation, collapse
    /// to the monotone anchor chain, then carve alignment windows.
    pub fn discover(
        &self,
        book: &BookIndex,
        asr_tokens: &[AsrToken],
    ) -> Result<AnchorResult, AnchorError> {
        self.params.validate().map_err(|e| AnchorError::InvalidParams(e.to_string()))?;

        let book_words: Vec<&str> = book.words.iter().map(|w| w.text.as_str()).collect();
        let asr_words: Vec<&str> = asr_tokens.iter().map(|t| t.text.as_str()).collect();
        let book_view = FilteredView::build(book_words.into_iter());
        let asr_view = FilteredView::build(asr_words.into_iter());

        let restricted_book_range = self.probe_section(book, &book_view, &asr_view);

        let stopwords = if self.params.use_stopwords {
            ngram::default_stopwords()
        } else {
            HashSet::new()
        };

        let book_slice_start = restricted_book_range.map(|(lo, _)| lo).unwrap_or(0);
        let book_slice_end = restricted_book_range.map(|(_, hi)| hi).unwrap_or(book_view.len());
        let book_tokens = &book_view.filtered[book_slice_start..book_slice_end];

        let target_candidates =
            ((book_tokens.len().max(1)) as f64 / self.params.target_per_tokens.max(1) as f64).ceil() as usize;

        let mut chosen = Vec::new();
        let mut n = self.params.default_ngram.max(self.params.min_ngram);
        loop {
            let raw_exact = ngram::generate_candidates(
                book_tokens,
                &asr_view.filtered,
                n,
                &AnchorParams { allow_duplicates: false, ..self.params.clone() },
                &stopwords,
            );
            let mut candidates = raw_exact;
            if candidates.len() < target_candidates {
                // §4.C: "If too few survive the density target ... relax to
                // allow_duplicates = true" — this is the runner's own
                // automatic fallback, not conditional on the caller having
                // pre-enabled it. `allow_boundary_cross` stays whatever the
                // caller configured, independent of this relaxation.
                let relaxed_params = AnchorParams { allow_duplicates: true, ..self.params.clone() };
                let raw_relaxed =
                    ngram::generate_candidates(book_tokens, &asr_view.filtered, n, &relaxed_params, &stopwords);
                candidates = ngram::apply_relaxation_policy(
                    raw_relaxed,
                    &relaxed_params,
                    &|original_word_index| {
                        book.sentence_of_word(original_word_index).map(|s| s.id).unwrap_or(usize::MAX)
                    },
                    &book_view.filtered_to_original,
                );
            }

            // shift bp back into the unrestricted filtered-book coordinate space
            for c in &mut candidates {
                c.bp += book_slice_start;
            }
            let deduped = ngram::dedup_by_bp_prefer_smaller_ap(candidates);

            if deduped.len() >= target_candidates || n <= self.params.min_ngram {
                chosen = deduped;
                break;
            }
            n -= 1;
        }

        let anchors = lis::lis_by_ap(&chosen);
        let windows =
            build_windows(&anchors, (0, book_view.len()), (0, asr_view.len()));

        Ok(AnchorResult { anchors, windows, book_view, asr_view })
    }

    /// Best-effort restriction of the book search range to the section whose
    /// filtered tokens contain the first `section_probe_tokens` filtered ASR
    /// tokens as a contiguous run. Returns `None` (search the whole book)
    /// when no section matches, rather than failing the run.
    fn probe_section(
        &self,
        book: &BookIndex,
        book_view: &FilteredView,
        asr_view: &FilteredView,
    ) -> Option<(usize, usize)> {
        if book.sections.is_empty() || asr_view.is_empty() {
            return None;
        }
        let probe_len = self.params.section_probe_tokens.min(asr_view.len());
        if probe_len == 0 {
            return None;
        }
        let probe = &asr_view.filtered[..probe_len];

        for section in &book.sections {
            let Some((lo, hi)) = filtered_range_for_words(book_view, section.start_word, section.end_word)
            else {
                continue;
            };
            let section_tokens = &book_view.filtered[lo..hi];
            if section_tokens.len() < probe_len {
                continue;
            }
            if section_tokens.windows(probe_len).any(|w| w == probe) {
                return Some((lo, hi));
            }
        }
        None
    }
}

/// Maps an original (unfiltered) book word range to the corresponding
/// contiguous range in the filtered token view, skipping words that were
/// normalized away. Returns `None` if the range contains no surviving
/// tokens.
fn filtered_range_for_words(view: &FilteredView, start_word: usize, end_word: usize) -> Option<(usize, usize)> {
    let end_word = end_word.min(view.original_to_filtered.len());
    if start_word >= end_word {
        return None;
    }
    let mapped: Vec<usize> = view.original_to_filtered[start_word..end_word].iter().filter_map(|x| *x).collect();
    let first = *mapped.first()?;
    let last = *mapped.last()?;
    Some((first, last + 1))
}

/// Carves `[book_start, book_end)` x `[asr_start, asr_end)` into windows
/// bounded by successive anchors (§4.C): window 0 spans from the range start
/// to the first anchor, each middle window spans between two anchors, and
/// the final window spans from the last anchor to the range end. Lengths
/// are always clamped into range and never negative (usize arithmetic with
/// explicit `min`/`max` guards).
pub fn build_windows(
    anchors: &[Anchor],
    book_range: (usize, usize),
    asr_range: (usize, usize),
) -> Vec<AnchorWindow> {
    let (book_start, book_end) = book_range;
    let (asr_start, asr_end) = asr_range;

    let mut windows = Vec::with_capacity(anchors.len() + 1);
    let mut b_lo = book_start;
    let mut a_lo = asr_start;

    for anchor in anchors {
        let b_hi = anchor.bp.clamp(book_start, book_end);
        let a_hi = anchor.ap.clamp(asr_start, asr_end);
        windows.push(AnchorWindow {
            b_lo: b_lo.min(b_hi),
            b_hi,
            a_lo: a_lo.min(a_hi),
            a_hi,
        });
        b_lo = (anchor.bp + 1).clamp(book_start, book_end);
        a_lo = (anchor.ap + 1).clamp(asr_start, asr_end);
    }

    windows.push(AnchorWindow {
        b_lo: b_lo.min(book_end),
        b_hi: book_end,
        a_lo: a_lo.min(asr_end),
        a_hi: asr_end,
    });
    windows
}
