//! Forced-alignment adapter contract (SPEC_FULL.md §6, §5).
//!
//! The aligner binary itself is external (§1); this module defines the
//! subprocess contract plus the rented-workspace pool §5 calls for ("a
//! workspace pool: queue of workspace directories rented and returned around
//! each forced-alignment call").

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;

use super::AdapterError;

/// `align(corpus_dir, dict_path, acoustic_model) -> TextGrid_path` (§6). On
/// OOV words the adapter is responsible for invoking its own G2P sub-step
/// and extending the dictionary; that detail stays inside the adapter, not
/// the pipeline core.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ForcedAligner: Send + Sync {
    async fn align(
        &self,
        corpus_dir: &Path,
        dict_path: &Path,
        acoustic_model: &Path,
    ) -> Result<PathBuf, AdapterError>;
}

/// A fixed set of pre-created workspace directories, rented out one at a
/// time and returned after use, so concurrent forced-alignment jobs never
/// share scratch space (§5).
#[derive(Clone)]
pub struct WorkspacePool {
    available: Arc<Mutex<VecDeque<PathBuf>>>,
}

impl WorkspacePool {
    pub fn new(workspaces: Vec<PathBuf>) -> WorkspacePool {
        WorkspacePool { available: Arc::new(Mutex::new(workspaces.into_iter().collect())) }
    }

    /// Rents the next free workspace, blocking (cooperatively) until one is
    /// returned if the pool is currently exhausted. A real pool under load
    /// would pair this with a semaphore sized to the same capacity; the
    /// `mfa_capacity` semaphore in `crate::pipeline` already provides that
    /// bound, so this method only needs to find a free directory once a
    /// permit has been acquired.
    pub async fn rent(&self) -> PathBuf {
        loop {
            if let Some(dir) = self.available.lock().await.pop_front() {
                return dir;
            }
            tokio::task::yield_now().await;
        }
    }

    pub async fn ret(&self, workspace: PathBuf) {
        self.available.lock().await.push_back(workspace);
    }
}

/// Invokes an external forced-alignment binary (e.g. an MFA-compatible
/// CLI) as a subprocess, renting a workspace directory for the duration of
/// the call.
pub struct SubprocessForcedAligner {
    executable: PathBuf,
    workspaces: WorkspacePool,
}

impl SubprocessForcedAligner {
    pub fn new(executable: PathBuf, workspaces: WorkspacePool) -> SubprocessForcedAligner {
        SubprocessForcedAligner { executable, workspaces }
    }
}

#[async_trait]
impl ForcedAligner for SubprocessForcedAligner {
    async fn align(
        &self,
        corpus_dir: &Path,
        dict_path: &Path,
        acoustic_model: &Path,
    ) -> Result<PathBuf, AdapterError> {
        let workspace = self.workspaces.rent().await;
        let result = self.run_in_workspace(corpus_dir, dict_path, acoustic_model, &workspace).await;
        self.workspaces.ret(workspace).await;
        result
    }
}

impl SubprocessForcedAligner {
    async fn run_in_workspace(
        &self,
        corpus_dir: &Path,
        dict_path: &Path,
        acoustic_model: &Path,
        workspace: &Path,
    ) -> Result<PathBuf, AdapterError> {
        let output_grid = workspace.join("output.TextGrid");
        let status = tokio::process::Command::new(&self.executable)
            .arg("align")
            .arg(corpus_dir)
            .arg(dict_path)
            .arg(acoustic_model)
            .arg(workspace)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await?;

        if !status.success() {
            return Err(AdapterError::SubprocessFailed(status.code()));
        }
        if tokio::fs::metadata(&output_grid).await.is_err() {
            return Err(AdapterError::ForcedAlignerFailed(format!(
                "aligner exited successfully but {} is missing",
                output_grid.display()
            )));
        }
        Ok(output_grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspace_pool_rent_and_return_round_trips() {
        let pool = WorkspacePool::new(vec![PathBuf::from("/tmp/ws-a")]);
        let rented = pool.rent().await;
        assert_eq!(rented, PathBuf::from("/tmp/ws-a"));
        pool.ret(rented).await;
        let rented_again = pool.rent().await;
        assert_eq!(rented_again, PathBuf::from("/tmp/ws-a"));
    }

    #[tokio::test]
    async fn missing_executable_surfaces_as_subprocess_failure() {
        let pool = WorkspacePool::new(vec![std::env::temp_dir()]);
        let aligner = SubprocessForcedAligner::new(PathBuf::from("/nonexistent/mfa-binary"), pool);
        let result = aligner
            .align(Path::new("/tmp/corpus"), Path::new("/tmp/dict.txt"), Path::new("/tmp/model"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mocked_aligner_reports_external_failure_when_grid_missing() {
        let mut mock = MockForcedAligner::new();
        mock.expect_align()
            .times(1)
            .returning(|_, _, _| Err(AdapterError::SubprocessFailed(Some(1))));

        let result = mock.align(Path::new("/tmp/corpus"), Path::new("/tmp/dict.txt"), Path::new("/tmp/model")).await;
        assert!(matches!(result, Err(AdapterError::SubprocessFailed(Some(1)))));
    }
}
