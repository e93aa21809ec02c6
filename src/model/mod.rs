//! Shared data model flowing between pipeline stages.
//!
//! Every type here is plain data: serializable, comparable, and free of
//! adapter or I/O concerns. Stages consume and produce these types; the
//! store (`crate::store`) is the only thing that knows how they land on disk.

pub mod align;
pub mod anchor;
pub mod asr;
pub mod book;
pub mod manifest;
pub mod pause;
pub mod timegrid;
pub mod transcript;

pub use align::{AlignOp, ParagraphAlign, RollupStatus, SentenceAlign, WordAlign};
pub use anchor::{Anchor, AnchorWindow};
pub use asr::{AsrResponse, AsrToken};
pub use book::{
    BookIndex, BookWord, ParagraphRange, SectionKind, SectionRange, SentenceRange,
};
pub use manifest::{ArtifactRecord, Fingerprint, Manifest, StageName, StageRecord, StageStatus};
pub use pause::{PauseClass, PauseClassSummary, PauseSpan};
pub use timegrid::{TimeGrid, TimeInterval};
pub use transcript::{HydratedTranscript, TranscriptSentence, TranscriptWord};
