//! Time-grid data model (SPEC_FULL.md §3, §4.E, §6).
//!
//! The forced-alignment adapter hands back a Praat-style `TextGrid` short
//! form; `TimeGrid` is the parsed, stage-neutral shape the timing merger
//! consumes. Parsing lives in `crate::timing::textgrid`, not here.

use serde::{Deserialize, Serialize};

/// Labels that mark silence rather than spoken content (§3).
pub const SILENCE_LABELS: [&str; 4] = ["", "sp", "sil", "<sil>"];

/// One labeled interval from the forced aligner's time grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start_sec: f64,
    pub end_sec: f64,
    pub label: String,
}

impl TimeInterval {
    /// True if this interval's label marks silence rather than speech.
    pub fn is_silence(&self) -> bool {
        SILENCE_LABELS.contains(&self.label.as_str())
    }

    pub fn duration(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

/// The full set of intervals produced by one forced-alignment pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGrid {
    pub intervals: Vec<TimeInterval>,
}

impl TimeGrid {
    pub fn non_silence_intervals(&self) -> impl Iterator<Item = &TimeInterval> {
        self.intervals.iter().filter(|iv| !iv.is_silence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_labels_are_recognized() {
        for label in SILENCE_LABELS {
            let iv = TimeInterval {
                start_sec: 0.0,
                end_sec: 1.0,
                label: label.to_string(),
            };
            assert!(iv.is_silence(), "{label:?} should be silence");
        }
        let speech = TimeInterval {
            start_sec: 0.0,
            end_sec: 1.0,
            label: "hello".into(),
        };
        assert!(!speech.is_silence());
    }

    #[test]
    fn non_silence_filter_excludes_blank_and_sp() {
        let grid = TimeGrid {
            intervals: vec![
                TimeInterval { start_sec: 0.0, end_sec: 0.1, label: "".into() },
                TimeInterval { start_sec: 0.1, end_sec: 0.4, label: "hello".into() },
                TimeInterval { start_sec: 0.4, end_sec: 0.5, label: "sp".into() },
                TimeInterval { start_sec: 0.5, end_sec: 0.9, label: "world".into() },
            ],
        };
        let speech: Vec<_> = grid.non_silence_intervals().map(|iv| iv.label.as_str()).collect();
        assert_eq!(speech, vec!["hello", "world"]);
    }
}
