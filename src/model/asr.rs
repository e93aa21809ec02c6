//! ASR response data model (SPEC_FULL.md §3, §6).

use serde::{Deserialize, Serialize};

/// One word-level token emitted by the ASR adapter.
///
/// Timings are monotone non-decreasing across a response's `tokens`; gaps
/// between tokens are permitted and become candidate pause spans later in
/// the pipeline. Token text is preserved verbatim, filler words included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrToken {
    pub text: String,
    pub start_sec: f64,
    pub end_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// The full ASR pass over one chapter's audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrResponse {
    pub model_version: String,
    pub tokens: Vec<AsrToken>,
}

impl AsrResponse {
    /// True iff token timings are monotone non-decreasing, the invariant the
    /// anchor engine and aligner both assume when indexing into this list.
    pub fn timings_are_monotone(&self) -> bool {
        self.tokens
            .windows(2)
            .all(|pair| pair[0].start_sec <= pair[1].start_sec && pair[0].end_sec <= pair[1].end_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_tokens_pass() {
        let resp = AsrResponse {
            model_version: "v1".into(),
            tokens: vec![
                AsrToken {
                    text: "Hello".into(),
                    start_sec: 0.0,
                    end_sec: 0.4,
                    confidence: Some(0.9),
                },
                AsrToken {
                    text: "world".into(),
                    start_sec: 0.45,
                    end_sec: 0.8,
                    confidence: Some(0.95),
                },
            ],
        };
        assert!(resp.timings_are_monotone());
    }

    #[test]
    fn out_of_order_tokens_fail() {
        let resp = AsrResponse {
            model_version: "v1".into(),
            tokens: vec![
                AsrToken {
                    text: "world".into(),
                    start_sec: 0.45,
                    end_sec: 0.8,
                    confidence: None,
                },
                AsrToken {
                    text: "Hello".into(),
                    start_sec: 0.0,
                    end_sec: 0.4,
                    confidence: None,
                },
            ],
        };
        assert!(!resp.timings_are_monotone());
    }
}
