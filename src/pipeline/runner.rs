//! Pipeline runner: drives one chapter (or a batch of chapters) through the
//! nine-stage window, gating each stage on its fingerprint and tolerating a
//! Mfa adapter failure by falling back to pre-merge timings (SPEC_FULL.md
//! §4.H, §5, §8 scenario 6).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::adapters::{AsrEngine, AudioCodec, ForcedAligner};
use crate::book::BookIndexer;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError};
use crate::model::manifest::StageName;
use crate::store::ArtifactStore;

use super::book_index::{SharedBookIndex, SharedBookIndexHandle};
use super::stages::{self, StageOutcome};

/// Cooperative cancellation flag, checked between stages and at adapter
/// suspension points. A hand-rolled `AtomicBool` wrapper is enough here;
/// the runner never needs `tokio-util`'s child-token tree since a chapter's
/// stages run strictly sequentially.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Cancellation {
        Cancellation(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One chapter's worth of inputs and execution window (§4.H).
///
/// `from_stage`/`to_stage` are both inclusive: omitting either defaults to
/// the full `StageName::ORDER` range (§4.H's end-to-end scenario runs
/// `from=BookIndex to=Treatment` and expects Treatment itself to execute).
#[derive(Debug, Clone)]
pub struct ChapterRequest {
    pub chapter_id: String,
    pub book_source_path: PathBuf,
    pub audio_path: PathBuf,
    pub language: Option<String>,
    pub model: Option<String>,
    pub dict_path: PathBuf,
    pub acoustic_model: PathBuf,
    pub roomtone_seed_path: Option<PathBuf>,
    pub from_stage: Option<StageName>,
    pub to_stage: Option<StageName>,
    pub force: bool,
    pub cancellation: Option<Cancellation>,
}

impl ChapterRequest {
    pub fn new(chapter_id: impl Into<String>, book_source_path: impl Into<PathBuf>, audio_path: impl Into<PathBuf>) -> ChapterRequest {
        ChapterRequest {
            chapter_id: chapter_id.into(),
            book_source_path: book_source_path.into(),
            audio_path: audio_path.into(),
            language: None,
            model: None,
            dict_path: PathBuf::new(),
            acoustic_model: PathBuf::new(),
            roomtone_seed_path: None,
            from_stage: None,
            to_stage: None,
            force: false,
            cancellation: None,
        }
    }
}

/// Overall chapter result. `Partial` means every requested stage ran except
/// that forced alignment failed and Merge was skipped in consequence — the
/// chapter still has a usable (ASR-timed) hydrated transcript and master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChapterOutcome {
    pub chapter_id: String,
    pub status: ChapterStatus,
    pub ran: Vec<StageName>,
    pub cached: Vec<StageName>,
    pub error: Option<String>,
}

fn record_outcome(outcome: StageOutcome, stage: StageName, ran: &mut Vec<StageName>, cached: &mut Vec<StageName>) {
    match outcome {
        StageOutcome::Ran => ran.push(stage),
        StageOutcome::Cached => cached.push(stage),
    }
}

/// Holds the shared, cross-chapter collaborators: the book index guard,
/// the external adapters, and the resource semaphores from §5 (ASR
/// capacity, MFA capacity, and the batch worker pool).
pub struct PipelineRunner {
    config: PipelineConfig,
    work_dir: PathBuf,
    book_indexer: BookIndexer,
    book_index: SharedBookIndexHandle,
    asr_engine: Arc<dyn AsrEngine>,
    forced_aligner: Arc<dyn ForcedAligner>,
    audio_codec: Arc<dyn AudioCodec>,
    asr_semaphore: Arc<Semaphore>,
    mfa_semaphore: Arc<Semaphore>,
    batch_semaphore: Arc<Semaphore>,
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        book_indexer: BookIndexer,
        asr_engine: Arc<dyn AsrEngine>,
        forced_aligner: Arc<dyn ForcedAligner>,
        audio_codec: Arc<dyn AudioCodec>,
    ) -> Result<PipelineRunner, PipelineError> {
        let work_dir = config.resolve_work_dir();
        let asr_capacity = config.runner.asr_capacity.max(1);
        let mfa_capacity = config.runner.mfa_capacity.max(1);
        let max_workers = config.runner.max_workers.max(1);

        Ok(PipelineRunner {
            book_index: Arc::new(SharedBookIndex::new(&work_dir)),
            asr_semaphore: Arc::new(Semaphore::new(asr_capacity)),
            mfa_semaphore: Arc::new(Semaphore::new(mfa_capacity)),
            batch_semaphore: Arc::new(Semaphore::new(max_workers)),
            work_dir,
            config,
            book_indexer,
            asr_engine,
            forced_aligner,
            audio_codec,
        })
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    fn stage_window(&self, request: &ChapterRequest) -> Vec<StageName> {
        let order = StageName::ORDER;
        let from_idx = request.from_stage.map(StageName::index).unwrap_or(0);
        let to_idx = request.to_stage.map(StageName::index).unwrap_or(order.len() - 1);
        order[from_idx..=to_idx].to_vec()
    }

    fn check_cancelled(&self, request: &ChapterRequest) -> Result<(), PipelineError> {
        match &request.cancellation {
            Some(token) if token.is_cancelled() => Err(PipelineError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Runs one chapter through its requested stage window. Never panics
    /// on a stage error: every `Err` short-circuits into `ChapterStatus::Failed`
    /// with the error message preserved, matching §7's "a failure prints a
    /// single-line summary ... batch runs collect failures and continue".
    pub async fn run_chapter(&self, request: &ChapterRequest) -> ChapterOutcome {
        match self.run_chapter_inner(request).await {
            Ok(outcome) => outcome,
            Err(e) => ChapterOutcome {
                chapter_id: request.chapter_id.clone(),
                status: ChapterStatus::Failed,
                ran: Vec::new(),
                cached: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    async fn run_chapter_inner(&self, request: &ChapterRequest) -> Result<ChapterOutcome, PipelineError> {
        let stages = self.stage_window(request);
        let store = ArtifactStore::new(&self.work_dir, &request.chapter_id);

        let mut ran = Vec::new();
        let mut cached = Vec::new();
        let mut mfa_failed = false;

        let mut book = None;
        let mut asr = None;
        let mut alignment = None;
        let mut hydrated = None;
        let mut spans = None;

        for stage in stages {
            self.check_cancelled(request)?;
            let manifest = store.load_manifest().await?;

            match stage {
                StageName::BookIndex => {
                    let (index, outcome) = self
                        .book_index
                        .ensure(&self.book_indexer, &request.book_source_path, request.force)
                        .await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                    book = Some(index);
                }
                StageName::Asr => {
                    let _permit = self.asr_semaphore.acquire().await.map_err(|_| PipelineError::Cancelled)?;
                    let (outcome, response) = stages::run_asr_stage(
                        &store,
                        &manifest,
                        &request.audio_path,
                        request.language.as_deref(),
                        request.model.as_deref(),
                        self.asr_engine.as_ref(),
                        request.force,
                    )
                    .await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                    asr = Some(response);
                }
                StageName::Anchors => {
                    let book_ref = book.as_ref().ok_or_else(|| missing("book index", stage))?;
                    let asr_ref = asr.as_ref().ok_or_else(|| missing("ASR response", stage))?;
                    let (outcome, _anchors, _windows) =
                        stages::run_anchors_stage(&store, &manifest, book_ref, asr_ref, &self.config, request.force).await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                }
                StageName::Transcript => {
                    let book_ref = book.as_ref().ok_or_else(|| missing("book index", stage))?;
                    let asr_ref = asr.as_ref().ok_or_else(|| missing("ASR response", stage))?;
                    let (outcome, output) =
                        stages::run_transcript_stage(&store, &manifest, book_ref, asr_ref, &self.config, request.force).await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                    alignment = Some(output);
                }
                StageName::Hydrate => {
                    let book_ref = book.as_ref().ok_or_else(|| missing("book index", stage))?;
                    let asr_ref = asr.as_ref().ok_or_else(|| missing("ASR response", stage))?;
                    let alignment_ref = alignment.as_ref().ok_or_else(|| missing("alignment output", stage))?;
                    let (outcome, transcript) = stages::run_hydrate_stage(
                        &store,
                        &manifest,
                        &request.chapter_id,
                        book_ref,
                        asr_ref,
                        alignment_ref,
                        request.force,
                    )
                    .await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                    hydrated = Some(transcript);
                }
                StageName::Mfa => {
                    let transcript_ref = hydrated.as_ref().ok_or_else(|| missing("hydrated transcript", stage))?;
                    let _permit = self.mfa_semaphore.acquire().await.map_err(|_| PipelineError::Cancelled)?;
                    let corpus_dir = store.chapter_dir();
                    match stages::run_mfa_stage(
                        &store,
                        &manifest,
                        transcript_ref,
                        &corpus_dir,
                        &request.dict_path,
                        &request.acoustic_model,
                        self.forced_aligner.as_ref(),
                        request.force,
                    )
                    .await
                    {
                        Ok(outcome) => record_outcome(outcome, stage, &mut ran, &mut cached),
                        Err(e) if e.kind() == ErrorKind::ExternalFailure => {
                            store.mark_stage_failed(StageName::Mfa, "external_failure", &e.to_string()).await?;
                            tracing::warn!(chapter_id = %request.chapter_id, error = %e, "forced alignment failed, continuing on ASR timings");
                            mfa_failed = true;
                        }
                        Err(e) => return Err(e),
                    }
                }
                StageName::Merge => {
                    if mfa_failed {
                        continue;
                    }
                    let transcript_ref = hydrated.as_ref().ok_or_else(|| missing("hydrated transcript", stage))?;
                    let (outcome, merged) = stages::run_merge_stage(
                        &store,
                        &manifest,
                        &request.chapter_id,
                        transcript_ref,
                        &self.config,
                        request.force,
                    )
                    .await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                    hydrated = Some(merged);
                }
                StageName::Prosody => {
                    let book_ref = book.as_ref().ok_or_else(|| missing("book index", stage))?;
                    let transcript_ref = hydrated.as_ref().ok_or_else(|| missing("hydrated transcript", stage))?;
                    let chapter_duration = self.audio_codec.decode(&request.audio_path)?.duration_sec();
                    let (outcome, pause_spans) = stages::run_prosody_stage(
                        &store,
                        &manifest,
                        book_ref,
                        transcript_ref,
                        chapter_duration,
                        &self.config,
                        request.force,
                    )
                    .await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                    spans = Some(pause_spans);
                }
                StageName::Treatment => {
                    let pause_spans = spans.as_deref().ok_or_else(|| missing("pause spans", stage))?;
                    let outcome = stages::run_treatment_stage(
                        &store,
                        &manifest,
                        &request.chapter_id,
                        &request.audio_path,
                        pause_spans,
                        request.roomtone_seed_path.as_deref(),
                        self.audio_codec.as_ref(),
                        &self.config,
                        request.force,
                    )
                    .await?;
                    record_outcome(outcome, stage, &mut ran, &mut cached);
                }
            }
        }

        let status = if mfa_failed { ChapterStatus::Partial } else { ChapterStatus::Completed };
        Ok(ChapterOutcome { chapter_id: request.chapter_id.clone(), status, ran, cached, error: None })
    }

    /// Runs a batch of chapters with up to `runner.max_workers` running
    /// concurrently (§5). Every chapter's failure is isolated: one
    /// chapter's error never aborts its siblings (§7).
    pub async fn run_batch(self: Arc<PipelineRunner>, requests: Vec<ChapterRequest>) -> Vec<ChapterOutcome> {
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let runner = Arc::clone(&self);
            let semaphore = Arc::clone(&self.batch_semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("batch semaphore never closes");
                runner.run_chapter(&request).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => outcomes.push(ChapterOutcome {
                    chapter_id: "unknown".to_string(),
                    status: ChapterStatus::Failed,
                    ran: Vec::new(),
                    cached: Vec::new(),
                    error: Some(format!("chapter task panicked: {join_error}")),
                }),
            }
        }
        outcomes
    }
}

fn missing(what: &str, stage: StageName) -> PipelineError {
    PipelineError::Internal(format!("{what} missing before {stage:?} stage"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;
    use crate::adapters::{AdapterError, PcmAudio};
    use crate::book::PlainTextBookParser;
    use crate::model::asr::{AsrResponse, AsrToken};

    struct FakeAsrEngine;

    #[async_trait]
    impl AsrEngine for FakeAsrEngine {
        async fn transcribe(
            &self,
            _audio_path: &std::path::Path,
            _language: Option<&str>,
            _model: Option<&str>,
        ) -> Result<AsrResponse, AdapterError> {
            let words = ["the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog"];
            let tokens = words
                .iter()
                .enumerate()
                .map(|(i, w)| AsrToken {
                    text: w.to_string(),
                    start_sec: i as f64 * 0.4,
                    end_sec: i as f64 * 0.4 + 0.35,
                    confidence: Some(0.92),
                })
                .collect();
            Ok(AsrResponse { model_version: "fake-1".to_string(), tokens })
        }
    }

    struct AlwaysFailingAligner;

    #[async_trait]
    impl ForcedAligner for AlwaysFailingAligner {
        async fn align(
            &self,
            _corpus_dir: &std::path::Path,
            _dict_path: &std::path::Path,
            _acoustic_model: &std::path::Path,
        ) -> Result<PathBuf, AdapterError> {
            Err(AdapterError::SubprocessFailed(Some(1)))
        }
    }

    struct SilentAudioCodec;

    impl AudioCodec for SilentAudioCodec {
        fn decode(&self, _path: &std::path::Path) -> Result<PcmAudio, AdapterError> {
            Ok(PcmAudio { channels: vec![vec![0.0; 16_000 * 4]], sample_rate: 16_000 })
        }

        fn encode(&self, _audio: &PcmAudio, _bit_depth: u16, path: &std::path::Path) -> Result<(), AdapterError> {
            std::fs::write(path, b"fake wav bytes").map_err(AdapterError::from)
        }
    }

    fn test_runner(work_dir: &std::path::Path) -> PipelineRunner {
        let mut config = PipelineConfig::default();
        config.work_dir = Some(work_dir.to_path_buf());
        let book_indexer = BookIndexer::new(Box::new(PlainTextBookParser), config.book_index.clone());
        PipelineRunner::new(
            config,
            book_indexer,
            Arc::new(FakeAsrEngine),
            Arc::new(AlwaysFailingAligner),
            Arc::new(SilentAudioCodec),
        )
        .expect("runner constructs")
    }

    #[tokio::test]
    async fn mfa_failure_yields_partial_completion_on_asr_timings() {
        let dir = tempdir().expect("tempdir");
        let book_path = dir.path().join("book.txt");
        tokio::fs::write(&book_path, "The quick brown fox jumps over the lazy dog.")
            .await
            .expect("write book source");
        let audio_path = dir.path().join("chapter.wav");
        tokio::fs::write(&audio_path, b"fake audio bytes").await.expect("write audio");

        let runner = test_runner(dir.path());
        let request = ChapterRequest::new("chapter-1", book_path, audio_path);

        let outcome = runner.run_chapter(&request).await;

        assert_eq!(outcome.status, ChapterStatus::Partial);
        assert!(outcome.ran.contains(&StageName::Treatment), "treatment still runs on ASR-only timings");
        assert!(!outcome.ran.contains(&StageName::Merge) && !outcome.cached.contains(&StageName::Merge));
    }

    #[tokio::test]
    async fn stage_window_respects_from_and_to() {
        let dir = tempdir().expect("tempdir");
        let runner = test_runner(dir.path());
        let mut request = ChapterRequest::new("chapter-1", "book.txt", "chapter.wav");
        request.from_stage = Some(StageName::Asr);
        request.to_stage = Some(StageName::Hydrate);

        let window = runner.stage_window(&request);

        assert_eq!(window, vec![StageName::Asr, StageName::Anchors, StageName::Transcript, StageName::Hydrate]);
    }

    #[tokio::test]
    async fn second_run_reports_book_index_as_cached() {
        let dir = tempdir().expect("tempdir");
        let book_path = dir.path().join("book.txt");
        tokio::fs::write(&book_path, "The quick brown fox jumps over the lazy dog.")
            .await
            .expect("write book source");
        let audio_path = dir.path().join("chapter.wav");
        tokio::fs::write(&audio_path, b"fake audio bytes").await.expect("write audio");

        let runner = test_runner(dir.path());

        let first = runner
            .run_chapter(&ChapterRequest::new("chapter-1", book_path.clone(), audio_path.clone()))
            .await;
        assert!(first.ran.contains(&StageName::BookIndex));

        let second = runner.run_chapter(&ChapterRequest::new("chapter-1", book_path, audio_path)).await;
        assert!(second.cached.contains(&StageName::BookIndex));
        assert!(!second.ran.contains(&StageName::BookIndex));
    }
}
