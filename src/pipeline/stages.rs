//! Individual stage bodies (SPEC_FULL.md §4.H's execution contract, applied
//! per-stage). Each `run_*_stage` function is self-contained: it reads its
//! declared upstream artifacts from the store, computes its fingerprint,
//! skips if up to date, otherwise does the work and writes its artifacts
//! atomically, then updates the chapter manifest. None of them hold state
//! across calls — resuming a chapter from any stage means re-reading
//! whatever the previous stage left on disk, never relying on an
//! in-process cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::{AsrEngine, AudioCodec, ForcedAligner};
use crate::align;
use crate::anchor::AnchorEngine;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::align::{ParagraphAlign, SentenceAlign, WordAlign};
use crate::model::anchor::{Anchor, AnchorWindow};
use crate::model::asr::AsrResponse;
use crate::model::book::BookIndex;
use crate::model::manifest::{Manifest, StageName, StageStatus};
use crate::model::pause::{PauseClassSummary, PauseSpan};
use crate::model::timegrid::TimeGrid;
use crate::model::transcript::HydratedTranscript;
use crate::prosody;
use crate::store::ArtifactStore;
use crate::timing;
use crate::treatment;

const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn tool_versions(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

async fn upstream_hash(
    store: &ArtifactStore,
    paths: &[PathBuf],
) -> Result<String, PipelineError> {
    store.fold_upstream_hashes(paths).await.map_err(PipelineError::from)
}

fn params_hash<P: Serialize>(params: &P) -> Result<String, PipelineError> {
    ArtifactStore::params_hash(params).map_err(PipelineError::from)
}

/// Outcome of a single stage invocation, used by the runner to build up the
/// chapter's progress report without re-deriving it from the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Cached,
    Ran,
}

/// ASR stage (SPEC_FULL.md §4.H, §6): dispatches to the configured
/// `AsrEngine` and persists the raw token stream.
pub async fn run_asr_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    audio_path: &Path,
    language: Option<&str>,
    model: Option<&str>,
    engine: &dyn AsrEngine,
    force: bool,
) -> Result<(StageOutcome, AsrResponse), PipelineError> {
    #[derive(Serialize)]
    struct AsrRequestParams<'a> {
        language: Option<&'a str>,
        model: Option<&'a str>,
    }

    let input_hash = upstream_hash(store, &[audio_path.to_path_buf()]).await?;
    let params = AsrRequestParams { language, model };
    let hash = params_hash(&params)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Asr, "asr.json");

    if !force && store.is_up_to_date(manifest, StageName::Asr, &fingerprint).await {
        let cached: AsrResponse = store.read_json(&artifact_path).await?;
        return Ok((StageOutcome::Cached, cached));
    }

    let response = engine.transcribe(audio_path, language, model).await?;
    store.write_json(&artifact_path, &response).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("asr.json".to_string(), rel_artifact_path(store, StageName::Asr, "asr.json"));
    store
        .mark_stage(StageName::Asr, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok((StageOutcome::Ran, response))
}

fn rel_artifact_path(store: &ArtifactStore, stage: StageName, name: &str) -> String {
    store
        .artifact_path(stage, name)
        .strip_prefix(store.chapter_dir())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| name.to_string())
}

/// Anchors stage (§4.C).
pub async fn run_anchors_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    book: &BookIndex,
    asr: &AsrResponse,
    config: &PipelineConfig,
    force: bool,
) -> Result<(StageOutcome, Vec<Anchor>, Vec<AnchorWindow>), PipelineError> {
    #[derive(Serialize, Deserialize)]
    struct AnchorArtifact {
        anchors: Vec<Anchor>,
        windows: Vec<AnchorWindow>,
    }

    let book_index_path = store.book_index_path();
    let asr_path = store.artifact_path(StageName::Asr, "asr.json");
    let input_hash = upstream_hash(store, &[book_index_path, asr_path]).await?;
    let hash = params_hash(&config.anchor)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Anchors, "anchors.json");

    if !force && store.is_up_to_date(manifest, StageName::Anchors, &fingerprint).await {
        let cached: AnchorArtifact = store.read_json(&artifact_path).await?;
        return Ok((StageOutcome::Cached, cached.anchors, cached.windows));
    }

    let engine = AnchorEngine::new(&config.anchor);
    let result = engine.discover(book, &asr.tokens)?;

    let artifact = AnchorArtifact { anchors: result.anchors.clone(), windows: result.windows.clone() };
    store.write_json(&artifact_path, &artifact).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("anchors.json".to_string(), rel_artifact_path(store, StageName::Anchors, "anchors.json"));
    store
        .mark_stage(StageName::Anchors, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok((StageOutcome::Ran, result.anchors, result.windows))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TranscriptArtifact {
    ops: Vec<WordAlign>,
    sentences: Vec<SentenceAlign>,
    paragraphs: Vec<ParagraphAlign>,
}

/// Transcript stage (§4.D): re-derives the filtered views and anchor
/// windows (cheap, deterministic) and runs the windowed DP.
pub async fn run_transcript_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    book: &BookIndex,
    asr: &AsrResponse,
    config: &PipelineConfig,
    force: bool,
) -> Result<(StageOutcome, align::AlignmentOutput), PipelineError> {
    let book_index_path = store.book_index_path();
    let asr_path = store.artifact_path(StageName::Asr, "asr.json");
    let anchors_path = store.artifact_path(StageName::Anchors, "anchors.json");
    let input_hash = upstream_hash(store, &[book_index_path, asr_path, anchors_path]).await?;
    let hash = params_hash(&config.align)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Transcript, "align.tx.json");

    if !force && store.is_up_to_date(manifest, StageName::Transcript, &fingerprint).await {
        let cached: TranscriptArtifact = store.read_json(&artifact_path).await?;
        return Ok((
            StageOutcome::Cached,
            align::AlignmentOutput { ops: cached.ops, sentences: cached.sentences, paragraphs: cached.paragraphs },
        ));
    }

    let engine = AnchorEngine::new(&config.anchor);
    let anchor_result = engine.discover(book, &asr.tokens)?;
    let output = align::run_alignment(book, &asr.tokens, &anchor_result, &config.align)?;

    let artifact = TranscriptArtifact {
        ops: output.ops.clone(),
        sentences: output.sentences.clone(),
        paragraphs: output.paragraphs.clone(),
    };
    store.write_json(&artifact_path, &artifact).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("align.tx.json".to_string(), rel_artifact_path(store, StageName::Transcript, "align.tx.json"));
    store
        .mark_stage(StageName::Transcript, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok((StageOutcome::Ran, output))
}

/// Hydrate stage (§4.D, §3): stitches book text onto ASR timings.
pub async fn run_hydrate_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    chapter_id: &str,
    book: &BookIndex,
    asr: &AsrResponse,
    alignment: &align::AlignmentOutput,
    force: bool,
) -> Result<(StageOutcome, HydratedTranscript), PipelineError> {
    let book_index_path = store.book_index_path();
    let asr_path = store.artifact_path(StageName::Asr, "asr.json");
    let tx_path = store.artifact_path(StageName::Transcript, "align.tx.json");
    let input_hash = upstream_hash(store, &[book_index_path, asr_path, tx_path]).await?;
    let hash = params_hash(&())?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Hydrate, "align.hydrate.json");

    if !force && store.is_up_to_date(manifest, StageName::Hydrate, &fingerprint).await {
        let cached: HydratedTranscript = store.read_json(&artifact_path).await?;
        return Ok((StageOutcome::Cached, cached));
    }

    let transcript = align::hydrate(chapter_id, book, &asr.tokens, alignment);
    store.write_json(&artifact_path, &transcript).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "align.hydrate.json".to_string(),
        rel_artifact_path(store, StageName::Hydrate, "align.hydrate.json"),
    );
    store
        .mark_stage(StageName::Hydrate, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok((StageOutcome::Ran, transcript))
}

/// Mfa stage (§4.H, §6, §5): invokes the external forced-alignment
/// subprocess. Failure here is recoverable at the *pipeline* level (the
/// runner keeps going with pre-merge timings, §8 scenario 6); this function
/// itself still surfaces the error so the caller can record it and decide.
pub async fn run_mfa_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    transcript: &HydratedTranscript,
    corpus_dir: &Path,
    dict_path: &Path,
    acoustic_model: &Path,
    aligner: &dyn ForcedAligner,
    force: bool,
) -> Result<StageOutcome, PipelineError> {
    #[derive(Serialize)]
    struct MfaParams<'a> {
        dict_path: &'a str,
        acoustic_model: &'a str,
    }

    let hydrate_path = store.artifact_path(StageName::Hydrate, "align.hydrate.json");
    let input_hash = upstream_hash(store, &[hydrate_path]).await?;
    let dict_path_str = dict_path.display().to_string();
    let acoustic_model_str = acoustic_model.display().to_string();
    let params = MfaParams { dict_path: &dict_path_str, acoustic_model: &acoustic_model_str };
    let hash = params_hash(&params)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Mfa, &format!("{}.TextGrid", transcript.chapter_id));

    if !force && store.is_up_to_date(manifest, StageName::Mfa, &fingerprint).await {
        return Ok(StageOutcome::Cached);
    }

    let produced = aligner.align(corpus_dir, dict_path, acoustic_model).await?;
    let bytes = tokio::fs::read(&produced)
        .await
        .map_err(|e| PipelineError::Internal(format!("reading forced-alignment output {}: {e}", produced.display())))?;
    store.write_atomic(&artifact_path, &bytes).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        format!("{}.TextGrid", transcript.chapter_id),
        rel_artifact_path(store, StageName::Mfa, &format!("{}.TextGrid", transcript.chapter_id)),
    );
    store
        .mark_stage(StageName::Mfa, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok(StageOutcome::Ran)
}

/// Merge stage (§4.E): folds the forced-alignment time grid into the
/// hydrated transcript. Only reachable when the Mfa stage actually
/// produced a TextGrid.
pub async fn run_merge_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    chapter_id: &str,
    hydrated: &HydratedTranscript,
    config: &PipelineConfig,
    force: bool,
) -> Result<(StageOutcome, HydratedTranscript), PipelineError> {
    let hydrate_path = store.artifact_path(StageName::Hydrate, "align.hydrate.json");
    let grid_path = store.artifact_path(StageName::Mfa, &format!("{chapter_id}.TextGrid"));
    let input_hash = upstream_hash(store, &[hydrate_path, grid_path.clone()]).await?;
    let hash = params_hash(&config.timing_merge)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Merge, "merged.json");

    if !force && store.is_up_to_date(manifest, StageName::Merge, &fingerprint).await {
        let cached: HydratedTranscript = store.read_json(&artifact_path).await?;
        return Ok((StageOutcome::Cached, cached));
    }

    let grid_text = tokio::fs::read_to_string(&grid_path)
        .await
        .map_err(|e| PipelineError::Internal(format!("reading time grid {}: {e}", grid_path.display())))?;
    let grid: TimeGrid = timing::textgrid::parse_short_text_grid(&grid_text, "words")?;

    let mut merged = hydrated.clone();
    let report = timing::merge_time_grid(&mut merged, &grid, config.timing_merge.lookahead_words);
    tracing::info!(matched = report.matched, unmatched = report.unmatched_labels.len(), "time grid merged");

    store.write_json(&artifact_path, &merged).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("merged.json".to_string(), rel_artifact_path(store, StageName::Merge, "merged.json"));
    store
        .mark_stage(StageName::Merge, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok((StageOutcome::Ran, merged))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProsodyArtifact {
    spans: Vec<PauseSpan>,
    summaries: Vec<PauseClassSummary>,
}

/// Prosody stage (§4.F).
pub async fn run_prosody_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    book: &BookIndex,
    transcript: &HydratedTranscript,
    chapter_duration_sec: f64,
    config: &PipelineConfig,
    force: bool,
) -> Result<(StageOutcome, Vec<PauseSpan>), PipelineError> {
    let upstream_path = store.artifact_path(StageName::Merge, "merged.json");
    let fallback_path = store.artifact_path(StageName::Hydrate, "align.hydrate.json");
    let source_path = if tokio::fs::metadata(&upstream_path).await.is_ok() { upstream_path } else { fallback_path };
    let input_hash = upstream_hash(store, &[source_path]).await?;
    let hash = params_hash(&config.prosody)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let artifact_path = store.artifact_path(StageName::Prosody, "pauses.json");

    if !force && store.is_up_to_date(manifest, StageName::Prosody, &fingerprint).await {
        let cached: ProsodyArtifact = store.read_json(&artifact_path).await?;
        return Ok((StageOutcome::Cached, cached.spans));
    }

    let analysis = prosody::analyze_pauses(book, transcript, chapter_duration_sec, &config.prosody)?;
    let artifact = ProsodyArtifact { spans: analysis.spans.clone(), summaries: analysis.summaries.clone() };
    store.write_json(&artifact_path, &artifact).await?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("pauses.json".to_string(), rel_artifact_path(store, StageName::Prosody, "pauses.json"));
    store
        .mark_stage(StageName::Prosody, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok((StageOutcome::Ran, analysis.spans))
}

/// Treatment stage (§4.G). The rendered master is written both under the
/// stage's own bookkeeping directory (for fingerprint/up-to-date checks)
/// and, as the chapter's externally-consumed deliverable, directly at
/// `<chapter_id>.treated.wav` under the chapter root (see DESIGN.md for why
/// this one artifact gets a flat copy, mirroring `book-index.json`'s own
/// top-level placement).
pub async fn run_treatment_stage(
    store: &ArtifactStore,
    manifest: &Manifest,
    chapter_id: &str,
    audio_path: &Path,
    spans: &[PauseSpan],
    seed_path: Option<&Path>,
    codec: &dyn AudioCodec,
    config: &PipelineConfig,
    force: bool,
) -> Result<StageOutcome, PipelineError> {
    let prosody_path = store.artifact_path(StageName::Prosody, "pauses.json");
    let input_hash = upstream_hash(store, &[audio_path.to_path_buf(), prosody_path]).await?;
    let hash = params_hash(&config.treatment)?;
    let tools = tool_versions(&[("mastering_pipeline", CRATE_VERSION)]);
    let fingerprint = ArtifactStore::compute_fingerprint(&input_hash, &hash, &tools);

    let name = format!("{chapter_id}.treated.wav");
    let stage_artifact_path = store.artifact_path(StageName::Treatment, &name);
    let flat_path = store.chapter_dir().join(&name);

    if !force && store.is_up_to_date(manifest, StageName::Treatment, &fingerprint).await {
        return Ok(StageOutcome::Cached);
    }

    let audio = codec.decode(audio_path)?;
    let seed = match seed_path {
        Some(path) => codec.decode(path)?,
        None => treatment::extract_roomtone_seed(&audio, config.treatment.analysis_window_ms * 4.0, config.treatment.seed_seam_ms),
    };
    let treated = treatment::treat(&audio, spans, &seed, &config.treatment)?;

    codec.encode(&treated, 16, &stage_artifact_path)?;
    if let Some(parent) = flat_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
    }
    tokio::fs::copy(&stage_artifact_path, &flat_path)
        .await
        .map_err(|e| PipelineError::Internal(format!("copying treated master to chapter root: {e}")))?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert(name.clone(), rel_artifact_path(store, StageName::Treatment, &name));
    store
        .mark_stage(StageName::Treatment, StageStatus::Completed, Some(fingerprint), artifacts)
        .await?;

    Ok(StageOutcome::Ran)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;
    use crate::adapters::AdapterError;
    use crate::model::asr::AsrToken;

    struct CountingAsrEngine {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsrEngine for CountingAsrEngine {
        async fn transcribe(
            &self,
            _audio_path: &Path,
            _language: Option<&str>,
            _model: Option<&str>,
        ) -> Result<AsrResponse, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AsrResponse {
                model_version: "fake-1".to_string(),
                tokens: vec![AsrToken { text: "hello".to_string(), start_sec: 0.0, end_sec: 0.4, confidence: Some(0.9) }],
            })
        }
    }

    #[tokio::test]
    async fn asr_stage_skips_second_run_when_fingerprint_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path(), "chapter-1");
        let audio_path = dir.path().join("audio.wav");
        tokio::fs::write(&audio_path, b"not really a wav, just bytes for hashing").await.expect("write audio");

        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CountingAsrEngine { calls: calls.clone() };

        let manifest = store.load_manifest().await.expect("fresh manifest");
        let (first_outcome, _) = run_asr_stage(&store, &manifest, &audio_path, None, None, &engine, false)
            .await
            .expect("first run succeeds");
        assert_eq!(first_outcome, StageOutcome::Ran);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let manifest = store.load_manifest().await.expect("manifest after first run");
        let (second_outcome, cached) = run_asr_stage(&store, &manifest, &audio_path, None, None, &engine, false)
            .await
            .expect("second run succeeds");
        assert_eq!(second_outcome, StageOutcome::Cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "engine must not be called again on a cache hit");
        assert_eq!(cached.model_version, "fake-1");
    }

    #[tokio::test]
    async fn asr_stage_reruns_when_force_is_set() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path(), "chapter-1");
        let audio_path = dir.path().join("audio.wav");
        tokio::fs::write(&audio_path, b"bytes").await.expect("write audio");

        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CountingAsrEngine { calls: calls.clone() };

        let manifest = store.load_manifest().await.expect("fresh manifest");
        run_asr_stage(&store, &manifest, &audio_path, None, None, &engine, false).await.expect("first run");

        let manifest = store.load_manifest().await.expect("manifest after first run");
        let (outcome, _) = run_asr_stage(&store, &manifest, &audio_path, None, None, &engine, true)
            .await
            .expect("forced rerun succeeds");
        assert_eq!(outcome, StageOutcome::Ran);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
