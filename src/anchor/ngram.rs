//! N-gram candidate generation for the anchor engine (SPEC_FULL.md §4.C).

use std::collections::{HashMap, HashSet};

use crate::config::AnchorParams;
use crate::model::anchor::Anchor;

/// A conservative built-in stopword set, used only when
/// `AnchorParams::use_stopwords` is set; the empty set (no filtering) is the
/// default per §4.C.
pub fn default_stopwords() -> HashSet<&'static str> {
    [
        "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "is", "was", "were",
        "it", "he", "she", "they", "i", "you", "we", "that", "this", "as", "with", "for", "be",
        "had", "has", "have",
    ]
    .into_iter()
    .collect()
}

fn ngram_index(tokens: &[String], n: usize) -> HashMap<&[String], Vec<usize>> {
    let mut index: HashMap<&[String], Vec<usize>> = HashMap::new();
    if n == 0 || tokens.len() < n {
        return index;
    }
    for start in 0..=(tokens.len() - n) {
        index.entry(&tokens[start..start + n]).or_default().push(start);
    }
    index
}

fn has_non_stopword(ngram: &[String], stopwords: &HashSet<&str>) -> bool {
    stopwords.is_empty() || ngram.iter().any(|t| !stopwords.contains(t.as_str()))
}

/// Generates raw `(bp, ap)` candidates for n-grams of length `n` shared by
/// the book and ASR filtered token views. When `allow_duplicates` is false,
/// only n-grams occurring exactly once on each side are kept; otherwise all
/// occurrence pairs are emitted (further filtered by separation/boundary
/// policy by the caller, §4.C).
pub fn generate_candidates(
    book_tokens: &[String],
    asr_tokens: &[String],
    n: usize,
    params: &AnchorParams,
    stopwords: &HashSet<&str>,
) -> Vec<Anchor> {
    let book_index = ngram_index(book_tokens, n);
    let asr_index = ngram_index(asr_tokens, n);

    let mut candidates = Vec::new();
    for (ngram, book_positions) in &book_index {
        if !has_non_stopword(ngram, stopwords) {
            continue;
        }
        let Some(asr_positions) = asr_index.get(ngram.as_ref() as &[String]) else { continue };

        let unique_each_side = book_positions.len() == 1 && asr_positions.len() == 1;
        if !params.allow_duplicates && !unique_each_side {
            continue;
        }
        for &bp in book_positions {
            for &ap in asr_positions {
                candidates.push(Anchor { bp, ap });
            }
        }
    }
    candidates.sort_by_key(|a| (a.bp, a.ap));
    candidates
}

/// Collapses multiple candidates sharing the same `bp` down to one, keeping
/// the smallest `ap` (§4.C's "Ties: prefer the candidate with the smaller
/// `ap`"). Input must be sorted by `(bp, ap)` ascending.
pub fn dedup_by_bp_prefer_smaller_ap(candidates: Vec<Anchor>) -> Vec<Anchor> {
    let mut out: Vec<Anchor> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match out.last() {
            Some(last) if last.bp == candidate.bp => continue,
            _ => out.push(candidate),
        }
    }
    out
}

/// Enforces `min_separation` tokens between successive `bp` occurrences when
/// duplicates are allowed, and — unless `allow_boundary_cross` — drops any
/// candidate whose book position falls in a different sentence than its
/// immediate predecessor's, keeping the two relaxation knobs orthogonal
/// (DESIGN.md Open Question 1).
pub fn apply_relaxation_policy(
    candidates: Vec<Anchor>,
    params: &AnchorParams,
    book_sentence_of_original: &dyn Fn(usize) -> usize,
    filtered_to_original: &[usize],
) -> Vec<Anchor> {
    if !params.allow_duplicates {
        return candidates;
    }
    let mut out: Vec<Anchor> = Vec::new();
    for candidate in candidates {
        if let Some(last) = out.last() {
            if candidate.bp.saturating_sub(last.bp) < params.min_separation {
                continue;
            }
            if !params.allow_boundary_cross {
                let last_original = filtered_to_original.get(last.bp).copied();
                let current_original = filtered_to_original.get(candidate.bp).copied();
                if let (Some(lo), Some(co)) = (last_original, current_original) {
                    if book_sentence_of_original(lo) != book_sentence_of_original(co) {
                        continue;
                    }
                }
            }
        }
        out.push(candidate);
    }
    out
}
