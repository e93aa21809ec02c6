//! Artifact & fingerprint store (SPEC_FULL.md §4.A).
//!
//! Each stage writes to a subdirectory containing its output artifacts,
//! `params.snapshot.json`, and `status.json`. The store owns atomic I/O
//! (write-to-temp, fsync, rename) and fingerprint computation; it never
//! interprets stage semantics.
//!
//! Grounded on `storage/database.rs`'s `Arc<Mutex<_>>`-wrapped shared
//! resource idiom (here: the manifest) and `transcription/content_hasher.rs`'s
//! hashing discipline, generalized from a SQLite connection to a chapter's
//! on-disk artifact tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::ErrorKind;
use crate::model::manifest::{Fingerprint, Manifest, StageName, StageRecord, StageStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize artifact {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialize artifact {name} at {path}: {source}")]
    Deserialize {
        name: String,
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("manifest at {path} is corrupted: {message}")]
    CorruptManifest { path: String, message: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io { .. } => ErrorKind::InputError,
            StoreError::Serialize { .. } => ErrorKind::InternalError,
            StoreError::Deserialize { .. } | StoreError::CorruptManifest { .. } => {
                ErrorKind::DataIntegrityError
            }
        }
    }
}

/// Content-addressed on-disk layout for one chapter, rooted at
/// `work_dir/<chapter_id>/` (§6's artifact layout).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    work_dir: PathBuf,
    chapter_id: String,
    manifest_lock: Arc<Mutex<()>>,
}

impl ArtifactStore {
    pub fn new(work_dir: impl Into<PathBuf>, chapter_id: impl Into<String>) -> ArtifactStore {
        ArtifactStore {
            work_dir: work_dir.into(),
            chapter_id: chapter_id.into(),
            manifest_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn chapter_dir(&self) -> PathBuf {
        self.work_dir.join(&self.chapter_id)
    }

    pub fn stage_dir(&self, stage: StageName) -> PathBuf {
        self.chapter_dir().join(stage_dir_name(stage))
    }

    pub fn artifact_path(&self, stage: StageName, name: &str) -> PathBuf {
        self.stage_dir(stage).join(name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.chapter_dir().join("manifest.json")
    }

    pub fn book_index_path(&self) -> PathBuf {
        self.work_dir.join("book-index.json")
    }

    /// SHA-256 over the raw bytes, hex-encoded. Used for source-file keys,
    /// upstream-artifact folding, and params canonicalization.
    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex_encode(&hasher.finalize())
    }

    /// Canonically serializes `params` (sorted keys, via `serde_json`'s
    /// default map ordering on a `BTreeMap`-shaped value) and hashes the
    /// result, so `params_hash` is reproducible across runs (§10.3).
    pub fn params_hash<P: Serialize>(params: &P) -> Result<String, StoreError> {
        let value = serde_json::to_value(params).map_err(|source| StoreError::Serialize {
            name: "params".into(),
            source,
        })?;
        let canonical = canonicalize_json(&value);
        Ok(Self::sha256_hex(canonical.as_bytes()))
    }

    /// `H(input_hash, params_hash, tool_versions)` (§4.A).
    pub fn compute_fingerprint(
        input_hash: &str,
        params_hash: &str,
        tool_versions: &BTreeMap<String, String>,
    ) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(input_hash.as_bytes());
        hasher.update(b"\0");
        hasher.update(params_hash.as_bytes());
        hasher.update(b"\0");
        for (tool, version) in tool_versions {
            hasher.update(tool.as_bytes());
            hasher.update(b"=");
            hasher.update(version.as_bytes());
            hasher.update(b";");
        }
        let digest = hex_encode(&hasher.finalize());
        Fingerprint {
            input_hash: input_hash.to_string(),
            params_hash: params_hash.to_string(),
            tool_versions: tool_versions.clone(),
            digest,
        }
    }

    /// Folds the SHA-256 of a set of upstream artifacts into one input hash,
    /// used as the `input_hash` half of a stage's fingerprint.
    pub async fn fold_upstream_hashes(&self, paths: &[PathBuf]) -> Result<String, StoreError> {
        let mut hasher = Sha256::new();
        for path in paths {
            let bytes = tokio::fs::read(path).await.map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            hasher.update(Self::sha256_hex(&bytes).as_bytes());
            hasher.update(b";");
        }
        Ok(hex_encode(&hasher.finalize()))
    }

    /// `true` iff the manifest's saved fingerprint for `stage` matches and
    /// every declared artifact exists on disk (§4.A).
    pub async fn is_up_to_date(
        &self,
        manifest: &Manifest,
        stage: StageName,
        fingerprint: &Fingerprint,
    ) -> bool {
        if !manifest.fingerprint_matches(stage, fingerprint) {
            return false;
        }
        let Some(record) = manifest.stage(stage) else { return false };
        for rel_path in record.artifacts.values() {
            if tokio::fs::metadata(self.chapter_dir().join(rel_path)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Atomic write: write to `<name>.tmp`, fsync, rename. Never leaves a
    /// partial artifact visible to other stages.
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let tmp_path = path.with_extension(tmp_extension(path));
        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(|source| StoreError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        use tokio::io::AsyncWriteExt;
        file.write_all(bytes).await.map_err(|source| StoreError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        file.sync_all().await.map_err(|source| StoreError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        tokio::fs::rename(&tmp_path, path).await.map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize { name, source })?;
        self.write_atomic(path, &bytes).await
    }

    pub async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Deserialize {
            name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            path: path.display().to_string(),
            source,
        })
    }

    /// Atomic read/modify/write of the chapter manifest, serialized by a
    /// per-chapter mutex (§5's "the manifest writer serializes updates with
    /// a per-chapter mutex").
    pub async fn update_manifest<F>(&self, mutate: F) -> Result<Manifest, StoreError>
    where
        F: FnOnce(&mut Manifest),
    {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.load_manifest_unlocked().await?;
        mutate(&mut manifest);
        self.write_json(&self.manifest_path(), &manifest).await?;
        Ok(manifest)
    }

    pub async fn load_manifest(&self) -> Result<Manifest, StoreError> {
        let _guard = self.manifest_lock.lock().await;
        self.load_manifest_unlocked().await
    }

    async fn load_manifest_unlocked(&self) -> Result<Manifest, StoreError> {
        let path = self.manifest_path();
        if tokio::fs::metadata(&path).await.is_err() {
            return Ok(Manifest::new(
                self.chapter_id.clone(),
                self.work_dir.display().to_string(),
                crate::model::manifest::InputRecord {
                    path: String::new(),
                    sha256: String::new(),
                    duration_sec: 0.0,
                },
            ));
        }
        self.read_json(&path).await
    }

    pub async fn mark_stage(
        &self,
        stage: StageName,
        status: StageStatus,
        fingerprint: Option<Fingerprint>,
        artifacts: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.update_manifest(move |manifest| {
            manifest.set_stage(
                stage,
                StageRecord {
                    status,
                    fingerprint,
                    artifacts,
                    error_kind: None,
                    message: None,
                },
            );
        })
        .await?;
        Ok(())
    }

    pub async fn mark_stage_failed(
        &self,
        stage: StageName,
        error_kind: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let error_kind = error_kind.to_string();
        let message = message.to_string();
        self.update_manifest(move |manifest| {
            let mut record = manifest.stage(stage).cloned().unwrap_or_else(StageRecord::pending);
            record.status = StageStatus::Failed;
            record.error_kind = Some(error_kind);
            record.message = Some(message);
            manifest.set_stage(stage, record);
        })
        .await?;
        Ok(())
    }
}

fn stage_dir_name(stage: StageName) -> &'static str {
    match stage {
        StageName::BookIndex => "book-index",
        StageName::Asr => "asr",
        StageName::Anchors => "anchors",
        StageName::Transcript => "transcript",
        StageName::Hydrate => "hydrate",
        StageName::Mfa => "alignment/mfa",
        StageName::Merge => "merge",
        StageName::Prosody => "prosody",
        StageName::Treatment => "treatment",
    }
}

fn tmp_extension(path: &Path) -> std::ffi::OsString {
    let mut ext = path.extension().map(|e| e.to_os_string()).unwrap_or_default();
    ext.push(".tmp");
    ext
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Recursively re-emits a `serde_json::Value` with object keys sorted, so
/// the same logical params always produce the same byte stream regardless
/// of struct field declaration order (relevant once params are round-tripped
/// through a dynamically-keyed map).
fn canonicalize_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize_json(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
