//! Roomtone treatment: silence probing, crossfade, and noise-floor-matched
//! gap fill (SPEC_FULL.md §4.G).
//!
//! Grounded on `audio/resampler.rs`'s buffer-and-window style over `Vec<f32>`
//! sample data and `audio/vad.rs`'s energy-threshold probing idiom, adapted
//! from real-time voice-activity gating to an offline inward RMS probe per
//! gap.

use thiserror::Error;

use crate::adapters::PcmAudio;
use crate::config::TreatmentParams;
use crate::error::ErrorKind;
use crate::model::pause::PauseSpan;

#[derive(Debug, Error)]
pub enum TreatmentError {
    #[error("seed audio has no channels")]
    EmptySeed,
    #[error("chapter audio and seed audio have different sample rates ({chapter} vs {seed})")]
    SampleRateMismatch { chapter: u32, seed: u32 },
}

impl TreatmentError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InternalError
    }
}

fn ms_to_samples(ms: f64, sample_rate: u32) -> usize {
    ((ms / 1000.0) * sample_rate as f64).round().max(0.0) as usize
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// RMS expressed in dBFS, floored well below audible silence so a
/// perfectly digital-zero window never produces `-inf`.
fn rms_db(samples: &[f32]) -> f64 {
    const FLOOR_DB: f64 = -120.0;
    let value = rms(samples);
    if value <= 0.0 {
        FLOOR_DB
    } else {
        (20.0 * value.log10()).max(FLOOR_DB)
    }
}

/// Scans inward from `gap_start` toward `gap_end` until the analysis window's
/// RMS falls below `threshold_db`, then applies the backoff margin (§4.G).
fn probe_left_edge(
    mix: &[f32],
    sample_rate: u32,
    gap_start: usize,
    gap_end: usize,
    threshold_db: f64,
    params: &TreatmentParams,
) -> usize {
    let window = ms_to_samples(params.analysis_window_ms, sample_rate).max(1);
    let hop = ms_to_samples(params.analysis_hop_ms, sample_rate).max(1);
    let mut pos = gap_start;
    while pos + window <= gap_end {
        if rms_db(&mix[pos..pos + window]) < threshold_db {
            break;
        }
        pos += hop;
    }
    let backoff = ms_to_samples(params.gap_backoff_ms, sample_rate);
    (pos + backoff).min(gap_end)
}

/// Symmetric to `probe_left_edge`, scanning inward from `gap_end`.
fn probe_right_edge(
    mix: &[f32],
    sample_rate: u32,
    gap_start: usize,
    gap_end: usize,
    threshold_db: f64,
    params: &TreatmentParams,
) -> usize {
    let window = ms_to_samples(params.analysis_window_ms, sample_rate).max(1);
    let hop = ms_to_samples(params.analysis_hop_ms, sample_rate).max(1);
    let mut pos = gap_end;
    while pos >= gap_start + window {
        if rms_db(&mix[pos - window..pos]) < threshold_db {
            break;
        }
        pos -= hop;
    }
    pos.saturating_sub(ms_to_samples(params.gap_backoff_ms, sample_rate)).max(gap_start)
}

/// Equal-power crossfade gains for a fade-in progressing from `0.0` (all
/// original signal) to `1.0` (all roomtone). `t` is clamped to `[0, 1]`.
fn equal_power_gains(t: f32) -> (f32, f32) {
    let t = t.clamp(0.0, 1.0);
    let angle = t * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Tiles `seed` circularly to fill `length` samples, scaled so its RMS
/// matches `target_dbfs`.
fn render_fill(seed: &[f32], length: usize, target_dbfs: f64) -> Vec<f32> {
    if seed.is_empty() || length == 0 {
        return vec![0.0; length];
    }
    let seed_rms = rms(seed);
    let target_linear = 10f64.powf(target_dbfs / 20.0);
    let scale = if seed_rms > 0.0 { (target_linear / seed_rms) as f32 } else { 0.0 };
    (0..length).map(|i| seed[i % seed.len()] * scale).collect()
}

/// Extracts the quietest `window_ms` window from the chapter's mixdown and
/// makes it loopable with an equal-power crossfade between its head and
/// tail (§4.G's roomtone-seed fallback, used when no caller-provided seed
/// file exists).
pub fn extract_roomtone_seed(audio: &PcmAudio, window_ms: f64, seam_ms: f64) -> PcmAudio {
    let mix = audio.mixdown();
    let window = ms_to_samples(window_ms, audio.sample_rate).max(1).min(mix.len().max(1));
    let hop = (window / 2).max(1);

    let mut best_start = 0usize;
    let mut best_rms = f64::INFINITY;
    let mut pos = 0usize;
    while pos + window <= mix.len() {
        let candidate_rms = rms(&mix[pos..pos + window]);
        if candidate_rms < best_rms {
            best_rms = candidate_rms;
            best_start = pos;
        }
        pos += hop;
    }

    let channels: Vec<Vec<f32>> = audio
        .channels
        .iter()
        .map(|channel| {
            let end = (best_start + window).min(channel.len());
            make_loopable(&channel[best_start..end], audio.sample_rate, seam_ms)
        })
        .collect();

    PcmAudio { channels, sample_rate: audio.sample_rate }
}

/// Crossfades `segment`'s head into its tail over `seam_ms` so it can be
/// tiled without an audible seam.
fn make_loopable(segment: &[f32], sample_rate: u32, seam_ms: f64) -> Vec<f32> {
    let seam = ms_to_samples(seam_ms, sample_rate).min(segment.len() / 2).max(1).min(segment.len());
    if segment.len() <= seam {
        return segment.to_vec();
    }
    let mut out = segment.to_vec();
    for i in 0..seam {
        let t = i as f32 / seam as f32;
        let (tail_gain, head_gain) = equal_power_gains(t);
        let tail_sample = segment[segment.len() - seam + i];
        let head_sample = segment[i];
        out[segment.len() - seam + i] = tail_sample * tail_gain + head_sample * head_gain;
    }
    out
}

/// Applies the §4.G treatment pass to every non-zero-length gap in `spans`,
/// replacing each gap's samples with crossfaded, noise-floor-matched
/// roomtone. Returns a new `PcmAudio` with the same frame count as `audio`
/// (SPEC_FULL.md §8's frame-count-preservation invariant); every sample is
/// clamped to `[-1, 1]`.
pub fn treat(
    audio: &PcmAudio,
    spans: &[PauseSpan],
    seed: &PcmAudio,
    params: &TreatmentParams,
) -> Result<PcmAudio, TreatmentError> {
    if seed.channels.is_empty() || seed.frame_count() == 0 {
        return Err(TreatmentError::EmptySeed);
    }
    if seed.sample_rate != audio.sample_rate {
        return Err(TreatmentError::SampleRateMismatch { chapter: audio.sample_rate, seed: seed.sample_rate });
    }

    let mix = audio.mixdown();
    let mut channels = audio.channels.clone();
    let frame_count = audio.frame_count();

    for span in spans {
        if span.duration() <= 0.0 {
            continue;
        }
        let gap_start = ms_to_samples(span.start_sec * 1000.0, audio.sample_rate).min(frame_count);
        let gap_end = ms_to_samples(span.end_sec * 1000.0, audio.sample_rate).min(frame_count);
        if gap_end <= gap_start {
            continue;
        }

        let left = probe_left_edge(&mix, audio.sample_rate, gap_start, gap_end, params.left_threshold_db, params);
        let right = probe_right_edge(&mix, audio.sample_rate, gap_start, gap_end, params.right_threshold_db, params);
        if right <= left {
            continue;
        }

        let fade = ms_to_samples(params.fade_ms, audio.sample_rate).min((right - left) / 2).max(1);
        let length = right - left;

        for (channel_idx, channel) in channels.iter_mut().enumerate() {
            let seed_channel = &seed.channels[channel_idx % seed.channels.len()];
            let fill = render_fill(seed_channel, length, params.target_roomtone_dbfs);

            for offset in 0..length {
                let i = left + offset;
                let original = channel[i];
                let roomtone = fill[offset];
                let room_gain = if offset < fade {
                    equal_power_gains(offset as f32 / fade as f32).1
                } else if offset >= length - fade {
                    equal_power_gains((length - offset) as f32 / fade as f32).1
                } else {
                    1.0
                };
                let orig_gain = 1.0 - room_gain;
                channel[i] = (original * orig_gain + roomtone * room_gain).clamp(-1.0, 1.0);
            }
        }
    }

    Ok(PcmAudio { channels, sample_rate: audio.sample_rate })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::model::pause::PauseClass;

    fn silence(frames: usize) -> Vec<f32> {
        vec![0.0; frames]
    }

    fn tone(frames: usize, amplitude: f32) -> Vec<f32> {
        (0..frames).map(|i| if i % 2 == 0 { amplitude } else { -amplitude }).collect()
    }

    #[test]
    fn zero_length_gap_is_a_no_op() {
        let audio = PcmAudio { channels: vec![tone(1000, 0.5)], sample_rate: 1000 };
        let seed = PcmAudio { channels: vec![silence(200)], sample_rate: 1000 };
        let spans = vec![PauseSpan { start_sec: 0.5, end_sec: 0.5, class: PauseClass::Sentence }];
        let treated = treat(&audio, &spans, &seed, &TreatmentParams::default()).unwrap();
        assert_eq!(treated.channels[0], audio.channels[0]);
    }

    #[test]
    fn frame_count_is_preserved() {
        let mut samples = tone(200, 0.6);
        samples.extend(silence(600));
        samples.extend(tone(200, 0.6));
        let audio = PcmAudio { channels: vec![samples.clone()], sample_rate: 1000 };
        let seed = PcmAudio { channels: vec![silence(100)], sample_rate: 1000 };
        let spans = vec![PauseSpan { start_sec: 0.2, end_sec: 0.8, class: PauseClass::Sentence }];
        let treated = treat(&audio, &spans, &seed, &TreatmentParams::default()).unwrap();
        assert_eq!(treated.channels[0].len(), samples.len());
    }

    #[test]
    fn every_output_sample_is_within_unit_range() {
        let mut samples = tone(200, 0.9);
        samples.extend(silence(400));
        samples.extend(tone(200, 0.9));
        let audio = PcmAudio { channels: vec![samples], sample_rate: 1000 };
        let mut seed_samples = tone(100, 0.95);
        seed_samples.extend(silence(10));
        let seed = PcmAudio { channels: vec![seed_samples], sample_rate: 1000 };
        let spans = vec![PauseSpan { start_sec: 0.2, end_sec: 0.6, class: PauseClass::Sentence }];
        let treated = treat(&audio, &spans, &seed, &TreatmentParams::default()).unwrap();
        assert!(treated.channels[0].iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn seed_generation_produces_loopable_buffer_of_requested_length() {
        let mut samples = tone(300, 0.8);
        samples.extend(silence(400));
        samples.extend(tone(300, 0.8));
        let audio = PcmAudio { channels: vec![samples], sample_rate: 1000 };
        let seed = extract_roomtone_seed(&audio, 200.0, 20.0);
        assert_eq!(seed.sample_rate, 1000);
        assert!(seed.frame_count() > 0);
    }

    #[test]
    fn mismatched_sample_rate_is_rejected() {
        let audio = PcmAudio { channels: vec![silence(100)], sample_rate: 1000 };
        let seed = PcmAudio { channels: vec![silence(100)], sample_rate: 2000 };
        let spans = vec![];
        let result = treat(&audio, &spans, &seed, &TreatmentParams::default());
        assert!(result.is_err());
    }

    proptest! {
        /// §8's roomtone invariants ("rendered sample count equals the
        /// original sample count"; "no sample outside [-1, 1]"), checked
        /// against arbitrary gap placement, length, and source amplitude
        /// rather than one fixed fixture.
        #[test]
        fn frame_count_and_sample_range_hold_for_arbitrary_gaps(
            gap_start_frame in 100usize..600,
            gap_len_frames in 1usize..300,
            amplitude in 0.05f32..0.95,
        ) {
            let total_frames = 1000usize;
            let samples = tone(total_frames, amplitude);
            let audio = PcmAudio { channels: vec![samples.clone()], sample_rate: 1000 };
            let seed = PcmAudio { channels: vec![silence(100)], sample_rate: 1000 };

            let gap_end_frame = (gap_start_frame + gap_len_frames).min(total_frames);
            let spans = vec![PauseSpan {
                start_sec: gap_start_frame as f64 / 1000.0,
                end_sec: gap_end_frame as f64 / 1000.0,
                class: PauseClass::Sentence,
            }];

            let treated = treat(&audio, &spans, &seed, &TreatmentParams::default()).unwrap();

            prop_assert_eq!(treated.channels[0].len(), samples.len());
            prop_assert!(treated.channels[0].iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }
}
