//! Pause-span data model (SPEC_FULL.md §3, §4.F).

use serde::{Deserialize, Serialize};

/// Structural classification of an inter-word gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseClass {
    Comma,
    Sentence,
    Paragraph,
    ChapterHead,
    PostChapterRead,
    Tail,
    Other,
}

/// One classified inter-word gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseSpan {
    pub start_sec: f64,
    pub end_sec: f64,
    pub class: PauseClass,
}

impl PauseSpan {
    pub fn duration(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

/// Aggregate statistics for one `PauseClass`, over non-negative finite
/// durations only (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseClassSummary {
    pub class: PauseClass,
    pub count: usize,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl PauseClassSummary {
    /// Builds the summary for one class from its durations. Durations that
    /// are negative, NaN, or infinite are excluded before aggregation, per
    /// §4.F's "non-negative finite durations" scope.
    pub fn from_durations(class: PauseClass, durations: &[f64]) -> PauseClassSummary {
        let mut valid: Vec<f64> = durations
            .iter()
            .copied()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .collect();
        valid.sort_by(|a, b| a.partial_cmp(b).unwrap());

        if valid.is_empty() {
            return PauseClassSummary {
                class,
                count: 0,
                total: 0.0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                median: 0.0,
            };
        }

        let count = valid.len();
        let total: f64 = valid.iter().sum();
        let mean = total / count as f64;
        let median = if count % 2 == 1 {
            valid[count / 2]
        } else {
            (valid[count / 2 - 1] + valid[count / 2]) / 2.0
        };

        PauseClassSummary {
            class,
            count,
            total,
            min: valid[0],
            max: valid[count - 1],
            mean,
            median,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_over_empty_durations_is_zeroed() {
        let summary = PauseClassSummary::from_durations(PauseClass::Comma, &[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, 0.0);
    }

    #[test]
    fn summary_excludes_negative_and_nan() {
        let summary = PauseClassSummary::from_durations(
            PauseClass::Sentence,
            &[0.5, -1.0, f64::NAN, 1.5, 2.0],
        );
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 0.5);
        assert_eq!(summary.max, 2.0);
        assert_eq!(summary.median, 1.5);
    }

    #[test]
    fn even_count_median_averages_middle_pair() {
        let summary = PauseClassSummary::from_durations(PauseClass::Other, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(summary.median, 2.5);
    }
}
