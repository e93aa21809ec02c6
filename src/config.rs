//! Layered pipeline configuration (SPEC_FULL.md §10.3).
//!
//! Every stage gets a strongly typed parameter record deriving
//! `Serialize`/`Deserialize` with `serde(default)` on every field, backed by
//! a `Default` impl matching the defaults named in §4. `PipelineConfig`
//! aggregates them plus global settings and can be loaded from a TOML file
//! layered under environment variable overrides, the way the reference
//! crate favors `Default` + explicit field overrides over a dynamically
//! typed config map.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameter `{field}`: {message}")]
    InvalidParameter { field: &'static str, message: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigError
    }
}

/// Book-indexer parameters (§4.B).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookIndexParams {
    /// Use a `PronunciationProvider` to populate per-word phonemes.
    pub populate_phonemes: bool,
}

impl Default for BookIndexParams {
    fn default() -> Self {
        BookIndexParams { populate_phonemes: false }
    }
}

/// Anchor-engine parameters (§4.C).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnchorParams {
    pub default_ngram: usize,
    pub min_ngram: usize,
    pub target_per_tokens: usize,
    pub allow_duplicates: bool,
    pub min_separation: usize,
    pub allow_boundary_cross: bool,
    pub use_stopwords: bool,
    pub section_probe_tokens: usize,
}

impl Default for AnchorParams {
    fn default() -> Self {
        AnchorParams {
            default_ngram: 3,
            min_ngram: 2,
            target_per_tokens: 40,
            allow_duplicates: false,
            min_separation: 5,
            allow_boundary_cross: false,
            use_stopwords: false,
            section_probe_tokens: 8,
        }
    }
}

impl AnchorParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ngram == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "min_ngram",
                message: "must be at least 1".into(),
            });
        }
        if self.default_ngram < self.min_ngram {
            return Err(ConfigError::InvalidParameter {
                field: "default_ngram",
                message: "must be >= min_ngram".into(),
            });
        }
        if self.target_per_tokens == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "target_per_tokens",
                message: "must be nonzero".into(),
            });
        }
        Ok(())
    }
}

/// Windowed-aligner parameters (§4.D).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlignParams {
    pub equivalent_cost: f32,
    pub near_miss_cost: f32,
    pub substitution_cost: f32,
    pub filler_insert_cost: f32,
    pub insert_cost: f32,
    pub delete_cost: f32,
}

impl Default for AlignParams {
    fn default() -> Self {
        AlignParams {
            equivalent_cost: 0.0,
            near_miss_cost: 0.3,
            substitution_cost: 1.0,
            filler_insert_cost: 0.3,
            insert_cost: 1.0,
            delete_cost: 1.0,
        }
    }
}

/// Timing-merge parameters (§4.E, §9's open question on look-ahead width).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingMergeParams {
    pub lookahead_words: usize,
}

impl Default for TimingMergeParams {
    fn default() -> Self {
        TimingMergeParams { lookahead_words: 3 }
    }
}

impl TimingMergeParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=5).contains(&self.lookahead_words) {
            return Err(ConfigError::InvalidParameter {
                field: "lookahead_words",
                message: "must be in 1..=5".into(),
            });
        }
        Ok(())
    }
}

/// Prosody/pause-analysis parameters (§4.F); presently just a namespace for
/// future thresholds, kept as its own record so the fingerprint hashing
/// discipline (§4.A, §10.3) stays uniform across stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProsodyParams {
    pub comma_gap_floor_ms: f64,
}

impl Default for ProsodyParams {
    fn default() -> Self {
        ProsodyParams { comma_gap_floor_ms: 0.0 }
    }
}

/// Roomtone-treatment parameters (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreatmentParams {
    pub analysis_window_ms: f64,
    pub analysis_hop_ms: f64,
    pub left_threshold_db: f64,
    pub right_threshold_db: f64,
    pub gap_step_ms: f64,
    pub gap_backoff_ms: f64,
    pub fade_ms: f64,
    pub target_roomtone_dbfs: f64,
    pub seed_seam_ms: f64,
}

impl Default for TreatmentParams {
    fn default() -> Self {
        TreatmentParams {
            analysis_window_ms: 30.0,
            analysis_hop_ms: 15.0,
            left_threshold_db: -45.0,
            right_threshold_db: -45.0,
            gap_step_ms: 10.0,
            gap_backoff_ms: 15.0,
            fade_ms: 20.0,
            target_roomtone_dbfs: -60.0,
            seed_seam_ms: 20.0,
        }
    }
}

impl TreatmentParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis_window_ms <= 0.0 || self.analysis_hop_ms <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                field: "analysis_window_ms/analysis_hop_ms",
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Global concurrency & retry settings (§4.H, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerParams {
    pub max_workers: usize,
    pub asr_capacity: usize,
    pub mfa_capacity: usize,
    pub external_retries: usize,
    pub stage_timeout_secs: u64,
}

impl Default for RunnerParams {
    fn default() -> Self {
        RunnerParams {
            max_workers: 4,
            asr_capacity: 1,
            mfa_capacity: 1,
            external_retries: 0,
            stage_timeout_secs: 600,
        }
    }
}

/// The aggregate, top-level configuration for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub work_dir: Option<PathBuf>,
    pub asr_service_url: Option<String>,
    pub forced_aligner_root: Option<PathBuf>,
    pub ffmpeg_exe: Option<PathBuf>,
    pub book_index: BookIndexParams,
    pub anchor: AnchorParams,
    pub align: AlignParams,
    pub timing_merge: TimingMergeParams,
    pub prosody: ProsodyParams,
    pub treatment: TreatmentParams,
    pub runner: RunnerParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            work_dir: None,
            asr_service_url: None,
            forced_aligner_root: None,
            ffmpeg_exe: None,
            book_index: BookIndexParams::default(),
            anchor: AnchorParams::default(),
            align: AlignParams::default(),
            timing_merge: TimingMergeParams::default(),
            prosody: ProsodyParams::default(),
            treatment: TreatmentParams::default(),
            runner: RunnerParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a TOML config file, then layers environment variable overrides
    /// on top (§6's `FFMPEG_EXE`, ASR service URL, forced-aligner root), the
    /// way the reference crate favors explicit field overrides.
    pub fn load(path: &Path) -> Result<PipelineConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: PipelineConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FFMPEG_EXE") {
            self.ffmpeg_exe = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("ASR_SERVICE_URL") {
            self.asr_service_url = Some(val);
        }
        if let Ok(val) = std::env::var("FORCED_ALIGNER_ROOT") {
            self.forced_aligner_root = Some(PathBuf::from(val));
        }
    }

    /// Raises `ConfigError` eagerly, before any stage runs (§10.3).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anchor.validate()?;
        self.timing_merge.validate()?;
        self.treatment.validate()?;
        if self.runner.max_workers == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "runner.max_workers",
                message: "must be at least 1".into(),
            });
        }
        if self.runner.asr_capacity == 0 || self.runner.mfa_capacity == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "runner.asr_capacity/mfa_capacity",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Resolves the work directory: the configured path, or (§10.5) the OS
    /// data directory joined with the crate name, rather than the process's
    /// current directory.
    pub fn resolve_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mastering-pipeline")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_target_per_tokens_is_rejected() {
        let mut config = PipelineConfig::default();
        config.anchor.target_per_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn lookahead_out_of_range_is_rejected() {
        let mut config = PipelineConfig::default();
        config.timing_merge.lookahead_words = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_work_dir_falls_back_to_data_dir() {
        let config = PipelineConfig::default();
        let resolved = config.resolve_work_dir();
        assert!(resolved.ends_with("mastering-pipeline"));
    }
}
