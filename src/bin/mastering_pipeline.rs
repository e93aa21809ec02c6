//! CLI driver for the mastering pipeline (SPEC_FULL.md §1: the command-line
//! surface is external to the pipeline core, so this binary stays a thin
//! argument-parsing-and-wiring shell; logging and configuration loading
//! both live here, never in the library).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use mastering_pipeline::adapters::asr::HttpAsrConfig;
use mastering_pipeline::adapters::{HttpAsrEngine, SubprocessForcedAligner, WavAudioCodec, WorkspacePool};
use mastering_pipeline::book::{BookIndexer, PlainTextBookParser};
use mastering_pipeline::config::PipelineConfig;
use mastering_pipeline::model::manifest::StageName;
use mastering_pipeline::pipeline::{ChapterRequest, ChapterStatus, PipelineRunner};

struct Args {
    chapter_id: String,
    book_path: PathBuf,
    audio_path: PathBuf,
    dict_path: PathBuf,
    acoustic_model: PathBuf,
    config_path: Option<PathBuf>,
    from_stage: Option<StageName>,
    to_stage: Option<StageName>,
    force: bool,
}

fn parse_stage(s: &str) -> Option<StageName> {
    match s {
        "book_index" => Some(StageName::BookIndex),
        "asr" => Some(StageName::Asr),
        "anchors" => Some(StageName::Anchors),
        "transcript" => Some(StageName::Transcript),
        "hydrate" => Some(StageName::Hydrate),
        "mfa" => Some(StageName::Mfa),
        "merge" => Some(StageName::Merge),
        "prosody" => Some(StageName::Prosody),
        "treatment" => Some(StageName::Treatment),
        _ => None,
    }
}

const USAGE: &str = "usage: mastering-pipeline <chapter_id> <book_path> <audio_path> \
    [--dict <path>] [--acoustic-model <path>] [--config <path>] \
    [--from <stage>] [--to <stage>] [--force]";

fn parse_args() -> Result<Args, String> {
    let mut positional = std::env::args().skip(1);
    let chapter_id = positional.next().ok_or("missing <chapter_id>")?;
    let book_path = PathBuf::from(positional.next().ok_or("missing <book_path>")?);
    let audio_path = PathBuf::from(positional.next().ok_or("missing <audio_path>")?);

    let mut dict_path = PathBuf::new();
    let mut acoustic_model = PathBuf::new();
    let mut config_path = None;
    let mut from_stage = None;
    let mut to_stage = None;
    let mut force = false;

    let rest: Vec<String> = positional.collect();
    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--dict" => {
                i += 1;
                dict_path = PathBuf::from(rest.get(i).ok_or("--dict requires a value")?);
            }
            "--acoustic-model" => {
                i += 1;
                acoustic_model = PathBuf::from(rest.get(i).ok_or("--acoustic-model requires a value")?);
            }
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(rest.get(i).ok_or("--config requires a value")?));
            }
            "--from" => {
                i += 1;
                let raw = rest.get(i).ok_or("--from requires a stage name")?;
                from_stage = Some(parse_stage(raw).ok_or_else(|| format!("unknown stage {raw:?}"))?);
            }
            "--to" => {
                i += 1;
                let raw = rest.get(i).ok_or("--to requires a stage name")?;
                to_stage = Some(parse_stage(raw).ok_or_else(|| format!("unknown stage {raw:?}"))?);
            }
            "--force" => force = true,
            other => return Err(format!("unrecognized argument: {other}")),
        }
        i += 1;
    }

    Ok(Args { chapter_id, book_path, audio_path, dict_path, acoustic_model, config_path, from_stage, to_stage, force })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = match &args.config_path {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {}: {e}", path.display());
                return ExitCode::from(2);
            }
        },
        None => PipelineConfig::default(),
    };
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return ExitCode::from(2);
    }

    let asr_config = HttpAsrConfig {
        service_url: config.asr_service_url.clone().unwrap_or_default(),
        retries: config.runner.external_retries,
        request_timeout_secs: config.runner.stage_timeout_secs,
    };
    let asr_engine = match HttpAsrEngine::new(asr_config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("failed to construct ASR client: {e}");
            return ExitCode::from(2);
        }
    };

    let executable = match config.forced_aligner_root.clone() {
        Some(path) => path,
        None => {
            eprintln!("forced_aligner_root is not configured; set it in the config file or FORCED_ALIGNER_ROOT");
            return ExitCode::from(2);
        }
    };
    let work_dir = config.resolve_work_dir();
    let workspace_root = work_dir.join("mfa-workspaces");
    let workspace_count = config.runner.mfa_capacity.max(1);
    let mut workspaces = Vec::with_capacity(workspace_count);
    for slot in 0..workspace_count {
        let dir = workspace_root.join(format!("slot-{slot}"));
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!("failed to create forced-alignment workspace {}: {e}", dir.display());
            return ExitCode::from(2);
        }
        workspaces.push(dir);
    }
    let forced_aligner = Arc::new(SubprocessForcedAligner::new(executable, WorkspacePool::new(workspaces)));

    let audio_codec = Arc::new(WavAudioCodec);
    let book_indexer = BookIndexer::new(Box::new(PlainTextBookParser), config.book_index.clone());

    let runner = match PipelineRunner::new(config, book_indexer, asr_engine, forced_aligner, audio_codec) {
        Ok(runner) => Arc::new(runner),
        Err(e) => {
            eprintln!("failed to construct pipeline runner: {e}");
            return ExitCode::from(2);
        }
    };

    let mut request = ChapterRequest::new(args.chapter_id, args.book_path, args.audio_path);
    request.dict_path = args.dict_path;
    request.acoustic_model = args.acoustic_model;
    request.from_stage = args.from_stage;
    request.to_stage = args.to_stage;
    request.force = args.force;

    let outcome = runner.run_chapter(&request).await;

    match outcome.status {
        ChapterStatus::Completed => {
            println!("{}: completed ({} ran, {} cached)", outcome.chapter_id, outcome.ran.len(), outcome.cached.len());
            ExitCode::SUCCESS
        }
        ChapterStatus::Partial => {
            println!(
                "{}: partial — forced alignment failed, continuing on ASR timings ({} ran, {} cached)",
                outcome.chapter_id,
                outcome.ran.len(),
                outcome.cached.len()
            );
            ExitCode::SUCCESS
        }
        ChapterStatus::Failed => {
            eprintln!("{}: failed — {}", outcome.chapter_id, outcome.error.as_deref().unwrap_or("unknown error"));
            ExitCode::FAILURE
        }
    }
}
