//! External adapter contracts (SPEC_FULL.md §6, §9).
//!
//! Everything under this module is an interface to a collaborator the core
//! pipeline treats as external per §1 — the ASR engine, the forced-alignment
//! subprocess, audio codec I/O, and pronunciation lookup. `crate::book` owns
//! the `BookParser` trait directly since it is the indexer's own extension
//! point, not a shared cross-stage contract.
//!
//! Stage code (`crate::pipeline`) depends on these traits, never on a
//! concrete adapter, so swapping an in-process ASR loader for an HTTP
//! client is a construction-site change only (§9's "inheritance-based stage
//! dispatch" redesign note, generalized to adapters).

pub mod asr;
pub mod audio;
pub mod forced_alignment;
pub mod pronunciation;

pub use asr::{AsrEngine, HttpAsrEngine};
pub use audio::{AudioCodec, PcmAudio, WavAudioCodec};
pub use forced_alignment::{ForcedAligner, SubprocessForcedAligner, WorkspacePool};
pub use pronunciation::{NullPronunciationProvider, PronunciationProvider};

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("ASR engine unavailable: {0}")]
    AsrUnavailable(String),
    #[error("forced aligner failed: {0}")]
    ForcedAlignerFailed(String),
    #[error("audio codec error: {0}")]
    AudioCodec(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("subprocess exited with status code {0:?}")]
    SubprocessFailed(Option<i32>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Every adapter failure maps to `ExternalFailure` (§7) — the adapters
    /// in this module are, by definition, the boundary to an external
    /// collaborator (a service, a subprocess, a codec binary).
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalFailure
    }
}
