//! Anchor and anchor-window data model (SPEC_FULL.md §3, §4.C).

use serde::{Deserialize, Serialize};

/// A trusted correspondence between a book token and an ASR token, used to
/// bound the windowed aligner's search space.
///
/// `bp`/`ap` are positions in the *filtered* token views (see
/// `crate::anchor::filter`), not raw word indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub bp: usize,
    pub ap: usize,
}

/// A half-open `[lo, hi)` search region between two consecutive anchors (or
/// between a sentinel and the first/last anchor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorWindow {
    pub b_lo: usize,
    pub b_hi: usize,
    pub a_lo: usize,
    pub a_hi: usize,
}

impl AnchorWindow {
    pub fn book_len(&self) -> usize {
        self.b_hi.saturating_sub(self.b_lo)
    }

    pub fn asr_len(&self) -> usize {
        self.a_hi.saturating_sub(self.a_lo)
    }

    pub fn is_empty(&self) -> bool {
        self.book_len() == 0 && self.asr_len() == 0
    }
}

/// Verifies the monotonicity invariant SPEC_FULL.md §8 requires of every
/// anchor list returned by the anchor engine: strictly increasing in both
/// coordinates.
pub fn is_strictly_monotone(anchors: &[Anchor]) -> bool {
    anchors
        .windows(2)
        .all(|pair| pair[0].bp < pair[1].bp && pair[0].ap < pair[1].ap)
}
