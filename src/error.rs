//! Top-level error taxonomy (SPEC_FULL.md §7, §10.2).
//!
//! Every subsystem (`store`, `book`, `anchor`, `align`, `timing`, `prosody`,
//! `treatment`, `adapters`, `config`) defines its own `thiserror`-derived
//! error enum scoped to that subsystem, mirroring the reference crate's
//! `ASRError`/`AudioError`/`VADError` split. `PipelineError` wraps each leaf
//! error and exposes the taxonomy kind from §7 via `kind()`, so the runner
//! can decide retry/mark-pending/abort without matching on every variant.

use thiserror::Error;

use crate::adapters::AdapterError;
use crate::align::AlignError;
use crate::anchor::AnchorError;
use crate::book::BookIndexError;
use crate::config::ConfigError;
use crate::prosody::ProsodyError;
use crate::store::StoreError;
use crate::timing::TimingMergeError;
use crate::treatment::TreatmentError;

/// The error taxonomy kinds from §7. Kinds, not types: several leaf error
/// variants across different subsystems can map to the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputError,
    ConfigError,
    ExternalFailure,
    DataIntegrityError,
    CancellationRequested,
    InternalError,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    BookIndex(#[from] BookIndexError),
    #[error(transparent)]
    Anchor(#[from] AnchorError),
    #[error(transparent)]
    Align(#[from] AlignError),
    #[error(transparent)]
    TimingMerge(#[from] TimingMergeError),
    #[error(transparent)]
    Prosody(#[from] ProsodyError),
    #[error(transparent)]
    Treatment(#[from] TreatmentError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cancellation requested")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The §7 taxonomy kind this error belongs to, used by the runner to
    /// decide whether a stage is retried, marked pending, or surfaced.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Store(e) => e.kind(),
            PipelineError::BookIndex(e) => e.kind(),
            PipelineError::Anchor(e) => e.kind(),
            PipelineError::Align(e) => e.kind(),
            PipelineError::TimingMerge(e) => e.kind(),
            PipelineError::Prosody(e) => e.kind(),
            PipelineError::Treatment(e) => e.kind(),
            PipelineError::Adapter(e) => e.kind(),
            PipelineError::Config(_) => ErrorKind::ConfigError,
            PipelineError::Cancelled => ErrorKind::CancellationRequested,
            PipelineError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
