//! Audio codec adapter contract (SPEC_FULL.md §6).
//!
//! Decode/encode/filter are the only operations the pipeline core needs
//! from an audio backend; richer container and effects support stays
//! external (§1). The WAV codepath is exercised end-to-end via `hound`; a
//! production deployment would add an `ffmpeg`-subprocess-backed codec for
//! other containers behind the same trait.

use std::path::Path;

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use super::AdapterError;

/// Planar float samples: one `Vec<f32>` per channel, each sample in
/// `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Mono mixdown used by components (prosody RMS probing, treatment)
    /// that only need a single reference signal.
    pub fn mixdown(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let channel_count = self.channel_count().max(1) as f32;
        let mut mixed = vec![0.0f32; frames];
        for channel in &self.channels {
            for (i, sample) in channel.iter().enumerate() {
                mixed[i] += sample / channel_count;
            }
        }
        mixed
    }
}

#[derive(Debug, Error)]
pub enum AudioCodecError {
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),
    #[error("hound error: {0}")]
    Hound(#[from] hound::Error),
}

/// `decode(path) -> {samples, sample_rate, channels}`, `encode(samples, ...)`,
/// `filter(samples, graph_spec) -> samples` (§6).
#[cfg_attr(test, automock)]
pub trait AudioCodec: Send + Sync {
    fn decode(&self, path: &Path) -> Result<PcmAudio, AdapterError>;
    fn encode(&self, audio: &PcmAudio, bit_depth: u16, path: &Path) -> Result<(), AdapterError>;

    /// Applies a named filter graph to the samples. The default
    /// implementation has no filters to offer and returns the input
    /// unchanged — a real deployment would delegate this to an `ffmpeg`
    /// subprocess adapter behind the same trait (§6's `FFMPEG_EXE`).
    fn filter(&self, audio: PcmAudio, _graph_spec: &str) -> Result<PcmAudio, AdapterError> {
        Ok(audio)
    }
}

/// `hound`-backed WAV codec: the one container format exercised end-to-end.
pub struct WavAudioCodec;

impl AudioCodec for WavAudioCodec {
    fn decode(&self, path: &Path) -> Result<PcmAudio, AdapterError> {
        let mut reader =
            hound::WavReader::open(path).map_err(|e| AdapterError::AudioCodec(e.to_string()))?;
        let spec = reader.spec();
        let channel_count = spec.channels as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, hound::Error>>()
                .map_err(|e| AdapterError::AudioCodec(e.to_string()))?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect::<Result<Vec<f32>, hound::Error>>()
                    .map_err(|e| AdapterError::AudioCodec(e.to_string()))?
            }
        };

        let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count.max(1)); channel_count];
        for (i, sample) in interleaved.into_iter().enumerate() {
            channels[i % channel_count].push(sample);
        }

        Ok(PcmAudio { channels, sample_rate: spec.sample_rate })
    }

    fn encode(&self, audio: &PcmAudio, bit_depth: u16, path: &Path) -> Result<(), AdapterError> {
        if bit_depth != 16 && bit_depth != 24 && bit_depth != 32 {
            return Err(AdapterError::AudioCodec(
                AudioCodecError::UnsupportedBitDepth(bit_depth).to_string(),
            ));
        }

        let spec = hound::WavSpec {
            channels: audio.channel_count().max(1) as u16,
            sample_rate: audio.sample_rate,
            bits_per_sample: bit_depth,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer =
            hound::WavWriter::create(path, spec).map_err(|e| AdapterError::AudioCodec(e.to_string()))?;
        let max_value = (1i64 << (bit_depth - 1)) as f32 - 1.0;
        let frames = audio.frame_count();

        for frame in 0..frames {
            for channel in &audio.channels {
                let sample = channel.get(frame).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
                let quantized = (sample * max_value).round() as i32;
                writer.write_sample(quantized).map_err(|e| AdapterError::AudioCodec(e.to_string()))?;
            }
        }
        writer.finalize().map_err(|e| AdapterError::AudioCodec(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixdown_averages_channels() {
        let audio = PcmAudio { channels: vec![vec![1.0, -1.0], vec![0.0, 0.0]], sample_rate: 16_000 };
        assert_eq!(audio.mixdown(), vec![0.5, -0.5]);
    }

    #[test]
    fn duration_uses_frame_count_and_sample_rate() {
        let audio = PcmAudio { channels: vec![vec![0.0; 16_000]], sample_rate: 16_000 };
        assert_eq!(audio.duration_sec(), 1.0);
    }

    #[test]
    fn round_trip_through_wav_preserves_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let audio = PcmAudio { channels: vec![vec![0.0, 0.25, -0.25, 0.5]], sample_rate: 8_000 };
        let codec = WavAudioCodec;
        codec.encode(&audio, 16, &path).unwrap();
        let decoded = codec.decode(&path).unwrap();
        assert_eq!(decoded.frame_count(), audio.frame_count());
        assert_eq!(decoded.sample_rate, 8_000);
    }

    #[test]
    fn mocked_codec_decode_failure_surfaces_as_audio_codec_error() {
        let mut mock = MockAudioCodec::new();
        mock.expect_decode()
            .times(1)
            .returning(|_| Err(AdapterError::AudioCodec("unreadable header".into())));

        let result = mock.decode(Path::new("bad.wav"));
        assert!(matches!(result, Err(AdapterError::AudioCodec(_))));
    }
}
