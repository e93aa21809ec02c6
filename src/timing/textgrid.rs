//! Praat short-form TextGrid parsing (SPEC_FULL.md §4.E, §6).
//!
//! Forced aligners in this ecosystem (Montreal Forced Aligner and
//! compatibles) emit a `TextGrid` with separate `words` and `phones` interval
//! tiers in Praat's "short text" format. This parser extracts one named
//! tier's intervals; every tier is assumed to be an interval tier (point
//! tiers are not produced by the forced-aligner adapters this pipeline uses).

use super::TimingMergeError;
use crate::model::timegrid::{TimeGrid, TimeInterval};

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

/// Parses the named tier (typically `"words"`) out of a short-form
/// `TextGrid` document. Falls back to the first interval tier encountered if
/// no tier with that exact name exists, since some aligners name their word
/// tier differently.
pub fn parse_short_text_grid(text: &str, tier_name: &str) -> Result<TimeGrid, TimingMergeError> {
    let mut capturing = false;
    let mut fallback_capturing = false;
    let mut seen_any_tier = false;

    let mut in_interval = false;
    let mut pending_start: Option<f64> = None;
    let mut pending_end: Option<f64> = None;

    let mut intervals = Vec::new();
    let mut fallback_intervals = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();

        if line.starts_with("intervals [") {
            in_interval = true;
            pending_start = None;
            pending_end = None;
            continue;
        }

        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        let value = value.trim();

        match key {
            "name" => {
                let name = unquote(value);
                capturing = name == tier_name;
                fallback_capturing = !seen_any_tier;
                seen_any_tier = true;
            }
            "xmin" if in_interval => pending_start = value.parse().ok(),
            "xmax" if in_interval => pending_end = value.parse().ok(),
            "text" if in_interval => {
                let label = unquote(value);
                if let (Some(start_sec), Some(end_sec)) = (pending_start, pending_end) {
                    let interval = TimeInterval { start_sec, end_sec, label };
                    if capturing {
                        intervals.push(interval.clone());
                    }
                    if fallback_capturing {
                        fallback_intervals.push(interval);
                    }
                }
                in_interval = false;
                pending_start = None;
                pending_end = None;
            }
            _ => {}
        }
    }

    if !intervals.is_empty() {
        Ok(TimeGrid { intervals })
    } else if !fallback_intervals.is_empty() {
        Ok(TimeGrid { intervals: fallback_intervals })
    } else {
        Err(TimingMergeError::NoIntervalTier { tier_name: tier_name.to_string() })
    }
}
