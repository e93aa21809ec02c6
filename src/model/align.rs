//! Windowed-alignment data model (SPEC_FULL.md §3, §4.D).

use serde::{Deserialize, Serialize};

/// Edit-distance operation kind assigned to a single book/ASR position pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignOp {
    Match,
    Sub,
    Ins,
    Del,
}

/// One step of the per-window DP backtrace, translated back to original
/// (unfiltered) book/ASR indices.
///
/// At most one of `book_idx`/`asr_idx` is `None`: `Ins` carries no
/// `book_idx`, `Del` carries no `asr_idx`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordAlign {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_idx: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_idx: Option<usize>,
    pub op: AlignOp,
    pub reason: AlignReason,
    pub score: f32,
}

/// Short tag explaining why the DP chose this operation, carried through to
/// the output op stream for downstream diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignReason {
    EqualOrEquiv,
    NearOrDiff,
    MissingBook,
    Filler,
    Extra,
}

/// WER/coverage/missing-run metrics computed for one sentence or paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupMetrics {
    pub wer: f32,
    pub coverage: f32,
    pub missing_runs: usize,
}

/// Coarse reliability bucket derived from `RollupMetrics` (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupStatus {
    Ok,
    Attention,
    Unreliable,
}

impl RollupStatus {
    /// `ok` if `wer <= 0.10 && dels < 3`, `attention` if `wer <= 0.25`,
    /// else `unreliable` (§4.D).
    pub fn classify(wer: f32, del_count: usize) -> RollupStatus {
        if wer <= 0.10 && del_count < 3 {
            RollupStatus::Ok
        } else if wer <= 0.25 {
            RollupStatus::Attention
        } else {
            RollupStatus::Unreliable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrRange {
    pub start: usize,
    pub end: usize,
}

/// Sentence-level rollup over the op stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceAlign {
    pub id: usize,
    pub book_start: usize,
    pub book_end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_range: Option<AsrRange>,
    pub metrics: RollupMetrics,
    pub status: RollupStatus,
}

/// Paragraph-level rollup, averaging its sentences' metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphAlign {
    pub id: usize,
    pub book_start: usize,
    pub book_end: usize,
    pub metrics: RollupMetrics,
    pub status: RollupStatus,
}

/// Verifies the op-stream coverage invariant from SPEC_FULL.md §8: over a
/// window spanning book range `[b0, b1]` and ASR range `[a0, a1]`,
/// `#Match + #Sub + #Del == b1 - b0 + 1` and `#Match + #Sub + #Ins == a1 - a0 + 1`.
pub fn covers_ranges(ops: &[WordAlign], book_len: usize, asr_len: usize) -> bool {
    let book_consuming = ops
        .iter()
        .filter(|op| matches!(op.op, AlignOp::Match | AlignOp::Sub | AlignOp::Del))
        .count();
    let asr_consuming = ops
        .iter()
        .filter(|op| matches!(op.op, AlignOp::Match | AlignOp::Sub | AlignOp::Ins))
        .count();
    book_consuming == book_len && asr_consuming == asr_len
}
