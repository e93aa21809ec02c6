//! Shared, CAS-guarded book index (SPEC_FULL.md §5: "one writer at a time
//! (semaphore capacity 1); many readers" plus "compare-and-swap claim so
//! only one force-rebuild proceeds even under contention").

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::book::BookIndexer;
use crate::error::PipelineError;
use crate::model::book::BookIndex;
use crate::pipeline::stages::StageOutcome;
use crate::store::ArtifactStore;

/// Guards the single `book-index.json` shared by every chapter under one
/// work directory. Readers never block; writers serialize through
/// `write_lock`, and `claimed` ensures that when several chapters request a
/// forced rebuild at once, exactly one of them performs the rebuild while
/// the rest wait and then observe the fresh fingerprint.
pub struct SharedBookIndex {
    work_dir: PathBuf,
    write_lock: Mutex<()>,
    claimed: AtomicBool,
}

impl SharedBookIndex {
    pub fn new(work_dir: impl Into<PathBuf>) -> SharedBookIndex {
        SharedBookIndex {
            work_dir: work_dir.into(),
            write_lock: Mutex::new(()),
            claimed: AtomicBool::new(false),
        }
    }

    fn path(&self) -> PathBuf {
        self.work_dir.join("book-index.json")
    }

    /// Returns the up-to-date book index for `source_path` plus whether it
    /// was rebuilt or served from the cached `book-index.json`, rebuilding
    /// it if absent, stale, or `force` is set. Only one concurrent caller
    /// actually runs the indexer; the rest observe its result as `Cached`.
    pub async fn ensure(
        &self,
        indexer: &BookIndexer,
        source_path: &Path,
        force: bool,
    ) -> Result<(BookIndex, StageOutcome), PipelineError> {
        let bytes = tokio::fs::read(source_path)
            .await
            .map_err(|e| PipelineError::Internal(format!("reading book source {}: {e}", source_path.display())))?;
        let source_hash = ArtifactStore::sha256_hex(&bytes);

        if !force {
            if let Some(existing) = self.read_if_current(&source_hash).await {
                return Ok((existing, StageOutcome::Cached));
            }
        }

        if self.claimed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            let result = self.rebuild(indexer, source_path, &bytes).await;
            self.claimed.store(false, Ordering::Release);
            return result.map(|index| (index, StageOutcome::Ran));
        }

        // Another task already claimed the rebuild; wait for it to finish
        // by acquiring (and immediately releasing) the write lock, then
        // read whatever it produced.
        let _guard = self.write_lock.lock().await;
        drop(_guard);
        self.read_if_current(&source_hash)
            .await
            .map(|index| (index, StageOutcome::Cached))
            .ok_or_else(|| PipelineError::Internal("book index missing after contended rebuild".into()))
    }

    async fn read_if_current(&self, source_hash: &str) -> Option<BookIndex> {
        let bytes = tokio::fs::read(self.path()).await.ok()?;
        let index: BookIndex = serde_json::from_slice(&bytes).ok()?;
        if index.source_file_hash == source_hash {
            Some(index)
        } else {
            None
        }
    }

    async fn rebuild(
        &self,
        indexer: &BookIndexer,
        source_path: &Path,
        bytes: &[u8],
    ) -> Result<BookIndex, PipelineError> {
        let _guard = self.write_lock.lock().await;
        let index = indexer
            .build(&source_path.display().to_string(), bytes)
            .map_err(PipelineError::BookIndex)?;

        let serialized = serde_json::to_vec_pretty(&index)
            .map_err(|e| PipelineError::Internal(format!("serializing book index: {e}")))?;
        let tmp_path = self.path().with_extension("json.tmp");
        if let Some(parent) = self.path().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Internal(e.to_string()))?;
        }
        tokio::fs::write(&tmp_path, &serialized).await.map_err(|e| PipelineError::Internal(e.to_string()))?;
        tokio::fs::rename(&tmp_path, self.path()).await.map_err(|e| PipelineError::Internal(e.to_string()))?;

        Ok(index)
    }
}

/// Shared handle, cloned into every chapter task spawned by the batch
/// runner.
pub type SharedBookIndexHandle = Arc<SharedBookIndex>;
